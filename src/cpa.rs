//! Capability interfaces of a configurable program analysis and their
//! predicate-abstraction composition.

use std::rc::Rc;

use log::info;

use crate::abstraction::AbstractionManager;
use crate::blocks::{BlockPartitioning, BlockStack};
use crate::cfa::{Cfa, CfaEdge};
use crate::config::{MergeStrategy, PredicateConfig, RelevantPredicatesStrategy};
use crate::domain::{AbstractionFormula, PredicateAbstractDomain, PredicateAbstractState, StateRef};
use crate::error::CpaResult;
use crate::lemma::LemmaSet;
use crate::merge::{MergeSep, PredicateMergeAbe, StopSep};
use crate::pathformula::{PathFormulaManager, SsaPathFormulaManager};
use crate::precision_adjust::PredicatePrecisionAdjustment;
use crate::predicates::{Precision, PredicateManager};
use crate::relevant::{
    AuxiliaryComputer, CachingRelevantPredicatesComputer, OccurrenceComputer, RelevantPredicatesComputer,
};
use crate::solver::Solver;
use crate::stats::Statistics;
use crate::transfer::{AbstractionPolicy, BamBlockOperator, BlockOperator, PredicateTransferRelation};

pub trait AbstractDomain {
    type State;

    fn is_less_or_equal(&self, s1: &Self::State, s2: &Self::State) -> CpaResult<bool>;

    /// Least upper bound. Domains that only merge through a merge operator panic.
    fn join(&self, s1: &Self::State, s2: &Self::State) -> Self::State;
}

pub trait TransferRelation {
    type State;
    type Precision;

    fn successors(&self, state: &Self::State, precision: &Self::Precision, edge: &CfaEdge)
        -> CpaResult<Vec<Self::State>>;
}

pub enum PrecisionResult<S> {
    Continue(S),
    /// The state has no concrete counterpart and is dropped.
    Unreachable,
}

pub trait PrecisionAdjustment {
    type State;
    type Precision;

    fn adjust(&self, state: Self::State, precision: &Self::Precision) -> CpaResult<PrecisionResult<Self::State>>;
}

pub trait MergeOperator {
    type State;
    type Precision;

    /// The merge of `new` into `reached`, or `None` to keep both apart.
    fn merge(&self, new: &Self::State, reached: &Self::State, precision: &Self::Precision)
        -> CpaResult<Option<Self::State>>;
}

pub trait StopOperator {
    type State;
    type Precision;

    /// Index of a state in `reached` covering `state`.
    fn stop(&self, state: &Self::State, reached: &[Self::State], precision: &Self::Precision)
        -> CpaResult<Option<usize>>;
}

type DynMerge = dyn MergeOperator<State = StateRef, Precision = Precision>;

/// The predicate analysis: every component wired to one solver, one
/// predicate manager, and one statistics record.
pub struct PredicateCpa {
    pub cfa: Rc<Cfa>,
    pub config: PredicateConfig,
    pub solver: Rc<dyn Solver>,
    pub stats: Rc<Statistics>,
    pub pmgr: Rc<PredicateManager>,
    pub fmgr: Rc<SsaPathFormulaManager>,
    pub amgr: Rc<AbstractionManager>,
    pub lemmas: Rc<LemmaSet>,
    pub domain: Rc<PredicateAbstractDomain>,
    pub transfer: PredicateTransferRelation<Box<dyn BlockOperator>>,
    pub precision_adjustment: PredicatePrecisionAdjustment,
    pub merge: Box<DynMerge>,
    pub stop: StopSep,
    pub relevant: Rc<dyn RelevantPredicatesComputer>,
    pub blocks: Option<Rc<BlockPartitioning>>,
    pub block_stack: BlockStack,
}

impl PredicateCpa {
    pub fn new(cfa: Rc<Cfa>, config: &PredicateConfig, solver: Rc<dyn Solver>, lemmas: LemmaSet) -> CpaResult<Self> {
        let config = config.validated()?;
        let stats = Rc::new(Statistics::default());
        let pmgr = Rc::new(PredicateManager::new());
        let lemmas = Rc::new(lemmas);
        let fmgr = Rc::new(SsaPathFormulaManager::new(
            lemmas.clone(),
            config.lemma_mode,
            config.lemma_depth,
        ));
        let amgr = Rc::new(AbstractionManager::new(
            solver.clone(),
            pmgr.clone(),
            config.abstraction_type,
            stats.clone(),
        ));
        let domain = Rc::new(PredicateAbstractDomain::new(
            solver.clone(),
            config.symbolic_coverage,
            stats.clone(),
        ));

        let block_stack = BlockStack::new();
        let policy = AbstractionPolicy {
            frequency: config.abstraction_frequency,
            at_targets: config.abstraction_at_targets,
        };
        let blocks = config.bam.then(|| Rc::new(BlockPartitioning::new(&cfa)));
        let block_operator: Box<dyn BlockOperator> = match &blocks {
            Some(partitioning) => Box::new(BamBlockOperator::new(policy, partitioning.clone(), block_stack.clone())),
            None => Box::new(policy),
        };
        let transfer = PredicateTransferRelation::new(cfa.clone(), fmgr.clone(), block_operator, stats.clone());

        let relevant: Rc<dyn RelevantPredicatesComputer> = match config.relevant_predicates {
            RelevantPredicatesStrategy::Occurrence => {
                Rc::new(CachingRelevantPredicatesComputer::new(OccurrenceComputer, stats.clone()))
            }
            RelevantPredicatesStrategy::Auxiliary => Rc::new(CachingRelevantPredicatesComputer::new(
                AuxiliaryComputer::new(solver.clone()),
                stats.clone(),
            )),
        };
        let precision_adjustment = PredicatePrecisionAdjustment::new(
            cfa.clone(),
            amgr.clone(),
            fmgr.clone(),
            relevant.clone(),
            block_stack.clone(),
            stats.clone(),
        );
        let merge: Box<DynMerge> = match config.merge {
            MergeStrategy::Sep => Box::new(MergeSep),
            MergeStrategy::Abe => Box::new(PredicateMergeAbe::new(fmgr.clone())),
        };
        let stop = StopSep::new(domain.clone());

        info!(
            "Predicate analysis: {:?} abstraction, {} lemmas, block summaries {}",
            config.abstraction_type,
            lemmas.len(),
            if blocks.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            cfa,
            config,
            solver,
            stats,
            pmgr,
            fmgr,
            amgr,
            lemmas,
            domain,
            transfer,
            precision_adjustment,
            merge,
            stop,
            relevant,
            blocks,
            block_stack,
        })
    }

    /// The abstraction state `true` at the program entry.
    pub fn initial_state(&self) -> StateRef {
        let empty = self.fmgr.empty();
        let top = Rc::new(AbstractionFormula::top(&self.pmgr, empty.clone()));
        PredicateAbstractState::abstraction(self.cfa.main().entry, empty, top, Rc::default())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::cfa::CfaBuilder;
    use crate::config::AbstractionFrequency;
    use crate::domain::StateKind;
    use crate::formula::{Formula, Symbol};
    use crate::predicates::PredicatePrecision;
    use crate::shutdown::ShutdownNotifier;
    use crate::solver::BddSolver;

    /// `x := 0; assume x == 1; ERROR`
    fn program() -> Cfa {
        let x = Symbol::bv("x", 8);
        let mut b = CfaBuilder::new();
        let (entry, _) = b.function("main");
        let n1 = b.node("main");
        let err = b.error_node("main");
        b.assign(entry, n1, &x, Formula::bv(0, 8));
        b.assume(n1, err, Formula::eq(Formula::var(x), Formula::bv(1, 8)), true);
        b.build("main").unwrap()
    }

    fn cpa(config: &PredicateConfig) -> PredicateCpa {
        let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
        PredicateCpa::new(Rc::new(program()), config, solver, LemmaSet::new()).unwrap()
    }

    fn step(cpa: &PredicateCpa, state: &StateRef, precision: &Precision) -> Option<StateRef> {
        let edge = cpa.cfa.leaving(state.location()).next().unwrap();
        let next = cpa.transfer.successors(state, precision, edge).unwrap().remove(0);
        match cpa.precision_adjustment.adjust(next, precision).unwrap() {
            PrecisionResult::Continue(s) => Some(s),
            PrecisionResult::Unreachable => None,
        }
    }

    #[test]
    fn test_abstraction_at_every_location() {
        let config = PredicateConfig {
            abstraction_frequency: AbstractionFrequency::EveryLocation,
            ..Default::default()
        };
        let cpa = cpa(&config);
        let root = cpa.initial_state();
        let s1 = step(&cpa, &root, &Precision::default()).unwrap();
        assert_eq!(s1.kind(), StateKind::Abstraction);
        assert!(s1.abstraction_formula().is_true());
        assert!(s1.path_formula().is_true());
        // without predicates the error location is still reachable
        assert!(step(&cpa, &s1, &Precision::default()).is_some());
        assert_eq!(cpa.stats.block_abstractions("main"), 2);
    }

    #[test]
    fn test_predicate_prunes_infeasible_branch() {
        let config = PredicateConfig {
            abstraction_frequency: AbstractionFrequency::EveryLocation,
            ..Default::default()
        };
        let cpa = cpa(&config);
        let x_is_one = cpa
            .pmgr
            .make_predicate(Formula::eq(Formula::var(Symbol::bv("x", 8)), Formula::bv(1, 8)));
        let mut predicates = PredicatePrecision::new();
        predicates.add_location(2, [x_is_one]);
        let precision = Precision::new(predicates, Default::default());

        let root = cpa.initial_state();
        let s1 = step(&cpa, &root, &precision).unwrap();
        assert_eq!(s1.abstraction_formula().formula().to_string(), "(not (= x (_ bv1 8)))");
        assert!(step(&cpa, &s1, &precision).is_none());
    }

    #[test]
    fn test_default_policy_abstracts_at_target_only() {
        let cpa = cpa(&PredicateConfig::default());
        let root = cpa.initial_state();
        let s1 = step(&cpa, &root, &Precision::default()).unwrap();
        assert_eq!(s1.kind(), StateKind::NonAbstraction);
        // the path to the target is infeasible on its own
        assert!(step(&cpa, &s1, &Precision::default()).is_none());
    }
}
