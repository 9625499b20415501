//! Predicate abstract states and their coverage order.

use std::cell::{OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::rc::{Rc, Weak};

use log::trace;

use crate::cfa::NodeId;
use crate::cpa::AbstractDomain;
use crate::error::CpaResult;
use crate::formula::ssa::instantiate;
use crate::formula::Formula;
use crate::pathformula::PathFormula;
use crate::predicates::PredicateManager;
use crate::region::cache::OpCache;
use crate::region::Region;
use crate::solver::Solver;
use crate::stats::{inc, Statistics};

/// Region of predicates together with the formulas it stands for.
#[derive(Debug)]
pub struct AbstractionFormula {
    id: usize,
    region: Region,
    /// The region as a formula over program variables.
    formula: Formula,
    /// `formula` at the versions reached by `block_formula`.
    instantiated: Formula,
    block_formula: PathFormula,
}

impl AbstractionFormula {
    pub fn new(id: usize, region: Region, formula: Formula, block_formula: PathFormula) -> Self {
        let instantiated = instantiate(&formula, block_formula.ssa());
        Self {
            id,
            region,
            formula,
            instantiated,
            block_formula,
        }
    }

    /// The abstraction `true` summarizing the empty path.
    pub fn top(pmgr: &PredicateManager, block_formula: PathFormula) -> Self {
        Self::new(pmgr.next_abstraction_id(), pmgr.bdd().one(), Formula::tt(), block_formula)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn instantiated(&self) -> &Formula {
        &self.instantiated
    }

    /// The path formula this abstraction was computed from.
    pub fn block_formula(&self) -> &PathFormula {
        &self.block_formula
    }

    pub fn is_true(&self) -> bool {
        self.formula.is_true()
    }

    pub fn is_false(&self) -> bool {
        self.formula.is_false()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateKind {
    NonAbstraction,
    /// A block end whose abstraction is still to be computed.
    ComputeAbstraction,
    Abstraction,
}

pub type StateRef = Rc<PredicateAbstractState>;

#[derive(Debug)]
pub struct PredicateAbstractState {
    kind: StateKind,
    location: NodeId,
    path_formula: PathFormula,
    abstraction: Rc<AbstractionFormula>,
    location_counts: Rc<BTreeMap<NodeId, u32>>,
    merged_into: OnceCell<Weak<PredicateAbstractState>>,
}

impl PredicateAbstractState {
    pub fn new(
        kind: StateKind,
        location: NodeId,
        path_formula: PathFormula,
        abstraction: Rc<AbstractionFormula>,
        location_counts: Rc<BTreeMap<NodeId, u32>>,
    ) -> StateRef {
        debug_assert!(kind != StateKind::Abstraction || path_formula.is_true());
        Rc::new(Self {
            kind,
            location,
            path_formula,
            abstraction,
            location_counts,
            merged_into: OnceCell::new(),
        })
    }

    /// Abstraction state for a freshly computed abstraction.
    pub fn abstraction(
        location: NodeId,
        path_formula: PathFormula,
        abstraction: Rc<AbstractionFormula>,
        location_counts: Rc<BTreeMap<NodeId, u32>>,
    ) -> StateRef {
        Self::new(StateKind::Abstraction, location, path_formula, abstraction, location_counts)
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn is_abstraction(&self) -> bool {
        self.kind == StateKind::Abstraction
    }

    pub fn location(&self) -> NodeId {
        self.location
    }

    pub fn path_formula(&self) -> &PathFormula {
        &self.path_formula
    }

    pub fn abstraction_formula(&self) -> &Rc<AbstractionFormula> {
        &self.abstraction
    }

    pub fn location_counts(&self) -> &Rc<BTreeMap<NodeId, u32>> {
        &self.location_counts
    }

    /// Number of abstractions at `node` on the path to this state.
    pub fn location_count(&self, node: NodeId) -> u32 {
        self.location_counts.get(&node).copied().unwrap_or(0)
    }

    /// Records the state this one was merged into. Only the first call has an effect.
    pub fn set_merged_into(&self, target: &StateRef) {
        let _ = self.merged_into.set(Rc::downgrade(target));
    }

    pub fn merged_into(&self) -> Option<StateRef> {
        self.merged_into.get().and_then(Weak::upgrade)
    }
}

impl Display for PredicateAbstractState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            StateKind::Abstraction => write!(f, "N{} abstraction {}", self.location, self.abstraction.formula),
            _ => write!(
                f,
                "N{} {} after abstraction #{}",
                self.location, self.path_formula, self.abstraction.id
            ),
        }
    }
}

pub struct PredicateAbstractDomain {
    solver: Rc<dyn Solver>,
    symbolic_coverage: bool,
    stats: Rc<Statistics>,
    cache: RefCell<OpCache<(usize, usize), bool>>,
}

impl PredicateAbstractDomain {
    pub fn new(solver: Rc<dyn Solver>, symbolic_coverage: bool, stats: Rc<Statistics>) -> Self {
        Self {
            solver,
            symbolic_coverage,
            stats,
            cache: RefCell::new(OpCache::default()),
        }
    }

    fn abstraction_implies(&self, a: &AbstractionFormula, b: &AbstractionFormula) -> CpaResult<bool> {
        if a.id == b.id || b.is_true() || a.is_false() {
            return Ok(true);
        }
        let key = (a.id, b.id);
        if let Some(result) = self.cache.borrow_mut().get(&key) {
            inc(&self.stats.coverage_cache_hits);
            return Ok(result);
        }
        let result = if a.region == b.region {
            true
        } else {
            inc(&self.stats.coverage_solver_checks);
            self.solver.implies(&a.formula, &b.formula)?
        };
        self.cache.borrow_mut().insert(key, result);
        Ok(result)
    }
}

impl AbstractDomain for PredicateAbstractDomain {
    type State = StateRef;

    fn is_less_or_equal(&self, s1: &StateRef, s2: &StateRef) -> CpaResult<bool> {
        inc(&self.stats.coverage_checks);
        match (s1.kind, s2.kind) {
            (StateKind::Abstraction, StateKind::Abstraction) => self.abstraction_implies(&s1.abstraction, &s2.abstraction),
            (StateKind::Abstraction, _) => Ok(false),
            (_, StateKind::Abstraction) => {
                if !self.symbolic_coverage {
                    return Ok(false);
                }
                inc(&self.stats.coverage_solver_checks);
                let context = Formula::and([s1.abstraction.instantiated.clone(), s1.path_formula.formula().clone()]);
                let target = instantiate(&s2.abstraction.formula, s1.path_formula.ssa());
                trace!("Symbolic coverage check of {} by {}", s1, s2);
                Ok(self.solver.implies(&context, &target)?)
            }
            _ => {
                if s1.merged_into().is_some_and(|m| Rc::ptr_eq(&m, s2)) {
                    return Ok(true);
                }
                Ok(s1.abstraction.id == s2.abstraction.id && s1.path_formula == s2.path_formula)
            }
        }
    }

    fn join(&self, _: &StateRef, _: &StateRef) -> StateRef {
        panic!("predicate abstract states are never joined; use a merge operator")
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::formula::ssa::SsaMap;
    use crate::formula::Symbol;
    use crate::shutdown::ShutdownNotifier;
    use crate::solver::BddSolver;

    struct Fixture {
        pmgr: PredicateManager,
        domain: PredicateAbstractDomain,
        stats: Rc<Statistics>,
    }

    fn fixture(symbolic: bool) -> Fixture {
        let pmgr = PredicateManager::new();
        let stats = Rc::new(Statistics::default());
        let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
        let domain = PredicateAbstractDomain::new(solver, symbolic, stats.clone());
        Fixture { pmgr, domain, stats }
    }

    fn x() -> Formula {
        Formula::var(Symbol::bv("x", 8))
    }

    fn empty() -> PathFormula {
        PathFormula::new(Formula::tt(), SsaMap::new(), 0)
    }

    fn abstraction_state(fx: &Fixture, atom: Formula) -> StateRef {
        let p = fx.pmgr.make_predicate(atom.clone());
        let af = AbstractionFormula::new(fx.pmgr.next_abstraction_id(), fx.pmgr.region(&p), atom, empty());
        PredicateAbstractState::abstraction(0, empty(), Rc::new(af), Rc::default())
    }

    #[test]
    fn test_abstraction_coverage_uses_solver_and_cache() {
        let fx = fixture(false);
        let one = abstraction_state(&fx, Formula::eq(x(), Formula::bv(1, 8)));
        let small = abstraction_state(&fx, Formula::ult(x(), Formula::bv(5, 8)));

        assert!(fx.domain.is_less_or_equal(&one, &small).unwrap());
        assert!(!fx.domain.is_less_or_equal(&small, &one).unwrap());
        assert!(fx.domain.is_less_or_equal(&one, &small).unwrap());
        assert_eq!(fx.stats.coverage_solver_checks.get(), 2);
        assert_eq!(fx.stats.coverage_cache_hits.get(), 1);
    }

    #[test]
    fn test_non_abstraction_coverage() {
        let fx = fixture(false);
        let top = Rc::new(AbstractionFormula::top(&fx.pmgr, empty()));
        let pf = PathFormula::new(Formula::eq(x(), Formula::bv(3, 8)), SsaMap::new(), 1);
        let a = PredicateAbstractState::new(StateKind::NonAbstraction, 1, pf.clone(), top.clone(), Rc::default());
        let b = PredicateAbstractState::new(StateKind::NonAbstraction, 1, pf, top.clone(), Rc::default());
        let other = PredicateAbstractState::new(StateKind::NonAbstraction, 1, empty(), top.clone(), Rc::default());
        assert!(fx.domain.is_less_or_equal(&a, &b).unwrap());
        assert!(!fx.domain.is_less_or_equal(&a, &other).unwrap());

        a.set_merged_into(&other);
        assert!(fx.domain.is_less_or_equal(&a, &other).unwrap());

        let abs = PredicateAbstractState::abstraction(1, empty(), top, Rc::default());
        assert!(!fx.domain.is_less_or_equal(&abs, &a).unwrap());
        assert!(!fx.domain.is_less_or_equal(&a, &abs).unwrap());
    }

    #[test]
    fn test_symbolic_coverage() {
        let fx = fixture(true);
        let small = abstraction_state(&fx, Formula::ult(x(), Formula::bv(5, 8)));
        let top = Rc::new(AbstractionFormula::top(&fx.pmgr, empty()));
        let x1 = Formula::var(Symbol::bv("x@1", 8));
        let pf = PathFormula::new(Formula::eq(x1, Formula::bv(2, 8)), SsaMap::new(), 1);
        let s = PredicateAbstractState::new(StateKind::NonAbstraction, 0, pf, top, Rc::default());
        assert!(fx.domain.is_less_or_equal(&s, &small).unwrap());
    }

    #[test]
    #[should_panic]
    fn test_join_is_a_contract_violation() {
        let fx = fixture(false);
        let s = abstraction_state(&fx, Formula::tt());
        fx.domain.join(&s, &s);
    }
}
