//! Merge and stop operators.

use std::rc::Rc;

use log::trace;

use crate::cpa::{AbstractDomain, MergeOperator, StopOperator};
use crate::domain::{PredicateAbstractDomain, PredicateAbstractState, StateKind, StateRef};
use crate::error::CpaResult;
use crate::pathformula::{PathFormulaManager, SsaPathFormulaManager};
use crate::predicates::Precision;

/// Never merges.
#[derive(Debug, Default, Copy, Clone)]
pub struct MergeSep;

impl MergeOperator for MergeSep {
    type State = StateRef;
    type Precision = Precision;

    fn merge(&self, _: &StateRef, _: &StateRef, _: &Precision) -> CpaResult<Option<StateRef>> {
        Ok(None)
    }
}

/// Merges non-abstraction states that share their last abstraction by
/// disjoining their path formulas.
pub struct PredicateMergeAbe {
    fmgr: Rc<SsaPathFormulaManager>,
}

impl PredicateMergeAbe {
    pub fn new(fmgr: Rc<SsaPathFormulaManager>) -> Self {
        Self { fmgr }
    }
}

impl MergeOperator for PredicateMergeAbe {
    type State = StateRef;
    type Precision = Precision;

    fn merge(&self, new: &StateRef, reached: &StateRef, _: &Precision) -> CpaResult<Option<StateRef>> {
        if new.kind() != StateKind::NonAbstraction || reached.kind() != StateKind::NonAbstraction {
            return Ok(None);
        }
        if new.abstraction_formula().id() != reached.abstraction_formula().id() || new.location() != reached.location() {
            return Ok(None);
        }
        if new.path_formula() == reached.path_formula() {
            return Ok(None);
        }
        let pf = self.fmgr.make_or(reached.path_formula(), new.path_formula());
        let merged = PredicateAbstractState::new(
            StateKind::NonAbstraction,
            reached.location(),
            pf,
            reached.abstraction_formula().clone(),
            reached.location_counts().clone(),
        );
        trace!("Merged states at N{}", reached.location());
        new.set_merged_into(&merged);
        Ok(Some(merged))
    }
}

/// Stops a state that is covered by a single reached state.
pub struct StopSep {
    domain: Rc<PredicateAbstractDomain>,
}

impl StopSep {
    pub fn new(domain: Rc<PredicateAbstractDomain>) -> Self {
        Self { domain }
    }
}

impl StopOperator for StopSep {
    type State = StateRef;
    type Precision = Precision;

    fn stop(&self, state: &StateRef, reached: &[StateRef], _: &Precision) -> CpaResult<Option<usize>> {
        for (i, other) in reached.iter().enumerate() {
            if self.domain.is_less_or_equal(state, other)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LemmaMode;
    use crate::domain::AbstractionFormula;
    use crate::formula::ssa::SsaMap;
    use crate::formula::{Formula, Symbol};
    use crate::lemma::LemmaSet;
    use crate::pathformula::PathFormula;
    use crate::predicates::PredicateManager;
    use crate::shutdown::ShutdownNotifier;
    use crate::solver::{BddSolver, Solver};
    use crate::stats::Statistics;

    fn fmgr() -> Rc<SsaPathFormulaManager> {
        Rc::new(SsaPathFormulaManager::new(Rc::new(LemmaSet::new()), LemmaMode::Assert, 2))
    }

    fn state(abstraction: &Rc<AbstractionFormula>, value: u64) -> StateRef {
        let x = Formula::var(Symbol::bv("x@2", 8));
        let mut ssa = SsaMap::new();
        ssa.set(&Symbol::bv("x", 8), 2);
        let pf = PathFormula::new(Formula::eq(x, Formula::bv(value, 8)), ssa, 1);
        PredicateAbstractState::new(StateKind::NonAbstraction, 4, pf, abstraction.clone(), Rc::default())
    }

    #[test]
    fn test_abe_merge_and_stop() {
        let pmgr = PredicateManager::new();
        let top = Rc::new(AbstractionFormula::top(&pmgr, PathFormula::new(Formula::tt(), SsaMap::new(), 0)));
        let a = state(&top, 1);
        let b = state(&top, 2);
        let merge = PredicateMergeAbe::new(fmgr());
        let merged = merge.merge(&b, &a, &Precision::default()).unwrap().unwrap();
        assert_eq!(merged.path_formula().formula().to_string(), "(or (= x@2 (_ bv1 8)) (= x@2 (_ bv2 8)))");

        let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
        let domain = Rc::new(PredicateAbstractDomain::new(solver, false, Rc::new(Statistics::default())));
        let stop = StopSep::new(domain);
        assert_eq!(stop.stop(&b, &[a.clone(), merged.clone()], &Precision::default()).unwrap(), Some(1));
        assert_eq!(stop.stop(&a, &[b.clone()], &Precision::default()).unwrap(), None);
    }

    #[test]
    fn test_abe_keeps_abstractions_apart() {
        let pmgr = PredicateManager::new();
        let empty = PathFormula::new(Formula::tt(), SsaMap::new(), 0);
        let first = Rc::new(AbstractionFormula::top(&pmgr, empty.clone()));
        let second = Rc::new(AbstractionFormula::top(&pmgr, empty));
        let merge = PredicateMergeAbe::new(fmgr());
        let a = state(&first, 1);
        let b = state(&second, 2);
        assert!(merge.merge(&b, &a, &Precision::default()).unwrap().is_none());
        assert!(MergeSep.merge(&b, &a, &Precision::default()).unwrap().is_none());
    }
}
