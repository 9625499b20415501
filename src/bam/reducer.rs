//! Translation of states and precisions between caller and block vocabulary.
//!
//! Reduction forgets every predicate that does not matter for the block and
//! restarts versioning at 1. Expansion conjoins the block's exit region with
//! the forgotten part of the caller region and shifts the block's versions
//! past the caller's.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use log::trace;

use crate::blocks::Block;
use crate::domain::{AbstractionFormula, PredicateAbstractState, StateKind, StateRef};
use crate::error::{CpaError, CpaResult};
use crate::formula::ssa::{SsaMap, DEFAULT_INDEX};
use crate::pathformula::{PathFormulaManager, SsaPathFormulaManager};
use crate::predicates::{AbstractionPredicate, Precision, PredicateManager};
use crate::relevant::RelevantPredicatesComputer;

/// A caller state and precision in block vocabulary.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub state: StateRef,
    pub precision: Precision,
    /// Predicates kept for the block.
    pub relevant: BTreeSet<AbstractionPredicate>,
}

pub struct BamReducer {
    pmgr: Rc<PredicateManager>,
    fmgr: Rc<SsaPathFormulaManager>,
    relevant: Rc<dyn RelevantPredicatesComputer>,
}

impl BamReducer {
    pub fn new(
        pmgr: Rc<PredicateManager>,
        fmgr: Rc<SsaPathFormulaManager>,
        relevant: Rc<dyn RelevantPredicatesComputer>,
    ) -> Self {
        Self { pmgr, fmgr, relevant }
    }

    /// Reduces an abstraction state at the entry of `block`.
    pub fn reduce(&self, block: &Block, entry: &StateRef, precision: &Precision) -> CpaResult<Reduction> {
        let bdd = self.pmgr.bdd();
        let caller = entry.abstraction_formula();
        let support = self.pmgr.support(caller.region());
        let mut candidates = precision.predicates.all_predicates();
        candidates.extend(support.iter().cloned());
        let relevant = self.relevant.relevant(block, &candidates)?;

        let hidden: BTreeSet<u32> = support.iter().filter(|p| !relevant.contains(*p)).map(|p| p.var()).collect();
        let region = bdd.exists(caller.region(), &hidden);
        let formula = self.pmgr.region_to_formula(region);
        trace!("Reduced entry of {} from {} to {}", block.name, caller.formula(), formula);

        let empty = self.fmgr.empty();
        let abstraction = Rc::new(AbstractionFormula::new(
            self.pmgr.next_abstraction_id(),
            region,
            formula,
            empty.clone(),
        ));
        let state = PredicateAbstractState::abstraction(block.entry, empty, abstraction, Rc::default());
        let predicates = precision.predicates.restrict(|p| relevant.contains(p));
        Ok(Reduction {
            state,
            precision: Precision::new(predicates, precision.lemmas.clone()),
            relevant,
        })
    }

    /// Lifts a reduced exit state of `block` into the context of `entry`.
    pub fn expand(
        &self,
        block: &Block,
        entry: &StateRef,
        relevant: &BTreeSet<AbstractionPredicate>,
        exit: &StateRef,
    ) -> CpaResult<StateRef> {
        let bdd = self.pmgr.bdd();
        let reduced = exit.abstraction_formula();
        if let Some(p) = self.pmgr.support(reduced.region()).into_iter().find(|p| !relevant.contains(p)) {
            return Err(CpaError::CacheInconsistency(format!(
                "exit summary of {} mentions {} outside the reduced context",
                block.name,
                p.atom()
            )));
        }

        let kept: BTreeSet<u32> = relevant.iter().map(|p| p.var()).collect();
        let caller = entry.abstraction_formula();
        let region = bdd.apply_and(reduced.region(), bdd.exists(caller.region(), &kept));
        let formula = self.pmgr.region_to_formula(region);

        let ssa = lift_ssa(block, entry.path_formula().ssa(), exit.path_formula().ssa())?;
        let pf = self.fmgr.empty_with(ssa);
        let abstraction = Rc::new(AbstractionFormula::new(
            self.pmgr.next_abstraction_id(),
            region,
            formula,
            pf.clone(),
        ));
        Ok(PredicateAbstractState::abstraction(
            exit.location(),
            pf,
            abstraction,
            entry.location_counts().clone(),
        ))
    }

    /// The caller-side state for a target found inside a block.
    pub fn expand_target(&self, entry: &StateRef, target: &StateRef) -> StateRef {
        PredicateAbstractState::new(
            StateKind::NonAbstraction,
            target.location(),
            self.fmgr.empty_with(entry.path_formula().ssa().clone()),
            entry.abstraction_formula().clone(),
            entry.location_counts().clone(),
        )
    }
}

/// Caller versions followed by the block's: local version `i` of `x`
/// becomes `caller(x) + i - 1`. Floors of the block's provider move the same
/// way, so versions used inside the block stay taken after it.
fn lift_ssa(block: &Block, caller: &SsaMap, local: &SsaMap) -> CpaResult<SsaMap> {
    let mut ssa = caller.clone();
    for (symbol, index) in local.symbols() {
        if !block.mentions(symbol) {
            return Err(CpaError::CacheInconsistency(format!(
                "variable {} assigned in summary of {} is not a variable of the block",
                symbol, block.name
            )));
        }
        ssa.set(symbol, caller.index(symbol) + index - 1);
    }
    let bases: BTreeMap<&str, u32> = caller.symbols().map(|(s, i)| (s.name(), i)).collect();
    let lifted = local
        .provider()
        .shifted(|name| bases.get(name).copied().unwrap_or(DEFAULT_INDEX) - 1);
    let provider = ssa.provider().merge(&lifted);
    Ok(ssa.with_provider(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::ssa::FreshValueProvider;
    use crate::formula::{Formula, Symbol};
    use crate::predicates::PredicatePrecision;
    use crate::relevant::OccurrenceComputer;

    fn block() -> Block {
        Block {
            name: Rc::from("f"),
            entry: 10,
            exit: 11,
            nodes: [10, 11].into_iter().collect(),
            variables: [Symbol::bv("p", 8)].into_iter().collect(),
        }
    }

    fn v(name: &str) -> Formula {
        Formula::var(Symbol::bv(name, 8))
    }

    struct Fixture {
        pmgr: Rc<PredicateManager>,
        fmgr: Rc<SsaPathFormulaManager>,
        reducer: BamReducer,
    }

    fn fixture() -> Fixture {
        let pmgr = Rc::new(PredicateManager::new());
        let fmgr = Rc::new(SsaPathFormulaManager::new(
            Default::default(),
            crate::config::LemmaMode::Assert,
            0,
        ));
        let reducer = BamReducer::new(pmgr.clone(), fmgr.clone(), Rc::new(OccurrenceComputer));
        Fixture { pmgr, fmgr, reducer }
    }

    fn state(f: &Fixture, location: usize, region: crate::region::Region, ssa: SsaMap) -> StateRef {
        let pf = f.fmgr.empty_with(ssa);
        let formula = f.pmgr.region_to_formula(region);
        let abstraction = Rc::new(AbstractionFormula::new(f.pmgr.next_abstraction_id(), region, formula, pf.clone()));
        PredicateAbstractState::abstraction(location, pf, abstraction, Rc::default())
    }

    #[test]
    fn test_reduce_then_expand() {
        let f = fixture();
        let bdd = f.pmgr.bdd();
        let inside = f.pmgr.make_predicate(Formula::eq(v("p"), Formula::bv(0, 8)));
        let outside = f.pmgr.make_predicate(Formula::eq(v("x"), Formula::bv(1, 8)));
        let entry_region = bdd.apply_and(f.pmgr.region(&inside), f.pmgr.region(&outside));
        let mut caller_ssa = SsaMap::new();
        caller_ssa.set(&Symbol::bv("p", 8), 3);
        let entry = state(&f, 10, entry_region, caller_ssa);

        let mut predicates = PredicatePrecision::new();
        predicates.add_global([inside.clone(), outside.clone()]);
        let reduction = f.reducer.reduce(&block(), &entry, &Precision::new(predicates, Default::default())).unwrap();
        assert_eq!(reduction.relevant, [inside.clone()].into_iter().collect());
        assert_eq!(reduction.state.abstraction_formula().region(), f.pmgr.region(&inside));
        assert!(reduction.state.path_formula().ssa().symbols().next().is_none());
        assert_eq!(reduction.precision.predicates.all_predicates().len(), 1);

        // the block sets p to something nonzero at its second version
        let mut local = SsaMap::new();
        local.set(&Symbol::bv("p", 8), 2);
        let exit = state(&f, 11, -f.pmgr.region(&inside), local);
        let expanded = f.reducer.expand(&block(), &entry, &reduction.relevant, &exit).unwrap();
        let expected = bdd.apply_and(-f.pmgr.region(&inside), f.pmgr.region(&outside));
        assert_eq!(expanded.abstraction_formula().region(), expected);
        assert_eq!(expanded.path_formula().ssa().index(&Symbol::bv("p", 8)), 4);
        assert_eq!(expanded.location(), 11);
    }

    #[test]
    fn test_expand_keeps_block_local_versions_taken() {
        let f = fixture();
        let p = Symbol::bv("p", 8);
        let mut caller_ssa = SsaMap::new();
        caller_ssa.set(&p, 3);
        let entry = state(&f, 10, f.pmgr.bdd().one(), caller_ssa);

        // p@5 was used on a path through the block that did not reach the exit
        let mut provider = FreshValueProvider::new();
        provider.record("p", 5);
        let mut local = SsaMap::new().with_provider(provider);
        local.set(&p, 2);
        let exit = state(&f, 11, f.pmgr.bdd().one(), local);

        let expanded = f.reducer.expand(&block(), &entry, &BTreeSet::new(), &exit).unwrap();
        let mut ssa = expanded.path_formula().ssa().clone();
        assert_eq!(ssa.index(&p), 4);
        assert_eq!(ssa.make_fresh(&p), 8);
    }

    #[test]
    fn test_foreign_variable_is_inconsistent() {
        let f = fixture();
        let entry = state(&f, 10, f.pmgr.bdd().one(), SsaMap::new());
        let mut local = SsaMap::new();
        local.set(&Symbol::bv("y", 8), 2);
        let exit = state(&f, 11, f.pmgr.bdd().one(), local);
        let result = f.reducer.expand(&block(), &entry, &BTreeSet::new(), &exit);
        assert!(matches!(result, Err(CpaError::CacheInconsistency(_))));
    }

    #[test]
    fn test_foreign_predicate_is_inconsistent() {
        let f = fixture();
        let outside = f.pmgr.make_predicate(Formula::eq(v("x"), Formula::bv(1, 8)));
        let entry = state(&f, 10, f.pmgr.bdd().one(), SsaMap::new());
        let exit = state(&f, 11, f.pmgr.region(&outside), SsaMap::new());
        let result = f.reducer.expand(&block(), &entry, &BTreeSet::new(), &exit);
        assert!(matches!(result, Err(CpaError::CacheInconsistency(_))));
    }
}
