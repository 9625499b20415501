//! Predicates relevant at a block interface.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use log::trace;

use crate::blocks::Block;
use crate::error::CpaResult;
use crate::formula::{Formula, Symbol};
use crate::predicates::AbstractionPredicate;
use crate::solver::Solver;
use crate::stats::{inc, Statistics};

type Predicates = BTreeSet<AbstractionPredicate>;

/// Projects a predicate set onto the part that matters for a block.
///
/// The result is a subset of the input and grows with the input.
pub trait RelevantPredicatesComputer {
    fn relevant(&self, block: &Block, predicates: &Predicates) -> CpaResult<Predicates>;
}

fn mentions_block_variable(block: &Block, p: &AbstractionPredicate) -> bool {
    p.atom().free_symbols().iter().any(|s| block.mentions(s))
}

/// Keeps the predicates that mention a variable of the block.
#[derive(Debug, Default, Copy, Clone)]
pub struct OccurrenceComputer;

impl RelevantPredicatesComputer for OccurrenceComputer {
    fn relevant(&self, block: &Block, predicates: &Predicates) -> CpaResult<Predicates> {
        Ok(predicates
            .iter()
            .filter(|p| mentions_block_variable(block, p))
            .cloned()
            .collect())
    }
}

/// Extends the occurrence set with every predicate that constrains a kept
/// predicate, until nothing changes.
///
/// A predicate constrains another if both share a variable and some
/// combination of their truth values is unsatisfiable.
pub struct AuxiliaryComputer {
    solver: Rc<dyn Solver>,
}

impl AuxiliaryComputer {
    pub fn new(solver: Rc<dyn Solver>) -> Self {
        Self { solver }
    }

    fn dependent(&self, p: &AbstractionPredicate, q: &AbstractionPredicate) -> CpaResult<bool> {
        let (a, b) = (p.atom().clone(), q.atom().clone());
        for (x, y) in [
            (a.clone(), b.clone()),
            (a.clone(), Formula::not(b.clone())),
            (Formula::not(a.clone()), b.clone()),
            (Formula::not(a), Formula::not(b)),
        ] {
            if self.solver.is_unsat(&Formula::and([x, y]))? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl RelevantPredicatesComputer for AuxiliaryComputer {
    fn relevant(&self, block: &Block, predicates: &Predicates) -> CpaResult<Predicates> {
        let mut kept = OccurrenceComputer.relevant(block, predicates)?;
        let vars: HashMap<&AbstractionPredicate, BTreeSet<Symbol>> =
            predicates.iter().map(|p| (p, p.atom().free_symbols())).collect();
        loop {
            let mut added = Vec::new();
            for p in predicates.iter().filter(|p| !kept.contains(*p)) {
                for q in &kept {
                    if vars[p].is_disjoint(&vars[q]) {
                        continue;
                    }
                    if self.dependent(p, q)? {
                        trace!("{} is relevant through {}", p.atom(), q.atom());
                        added.push(p.clone());
                        break;
                    }
                }
            }
            if added.is_empty() {
                return Ok(kept);
            }
            kept.extend(added);
        }
    }
}

/// Memoizes another computer per block and input set.
pub struct CachingRelevantPredicatesComputer<C> {
    inner: C,
    stats: Rc<Statistics>,
    cache: RefCell<HashMap<(Rc<str>, Predicates), Predicates>>,
}

impl<C> CachingRelevantPredicatesComputer<C> {
    pub fn new(inner: C, stats: Rc<Statistics>) -> Self {
        Self {
            inner,
            stats,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl<C: RelevantPredicatesComputer> RelevantPredicatesComputer for CachingRelevantPredicatesComputer<C> {
    fn relevant(&self, block: &Block, predicates: &Predicates) -> CpaResult<Predicates> {
        let key = (block.name.clone(), predicates.clone());
        if let Some(result) = self.cache.borrow().get(&key) {
            inc(&self.stats.relevant_cache_hits);
            return Ok(result.clone());
        }
        inc(&self.stats.relevant_computations);
        let result = self.inner.relevant(block, predicates)?;
        self.cache.borrow_mut().insert(key, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::predicates::PredicateManager;
    use crate::shutdown::ShutdownNotifier;
    use crate::solver::BddSolver;

    fn block() -> Block {
        Block {
            name: Rc::from("f"),
            entry: 0,
            exit: 1,
            nodes: [0, 1].into_iter().collect(),
            variables: [Symbol::bv("p", 8), Symbol::bv("t", 8)].into_iter().collect(),
        }
    }

    fn v(name: &str) -> Formula {
        Formula::var(Symbol::bv(name, 8))
    }

    #[test]
    fn test_occurrence_and_auxiliary() {
        let pmgr = PredicateManager::new();
        let on_interface = pmgr.make_predicate(Formula::eq(v("p"), v("q")));
        let linked = pmgr.make_predicate(Formula::eq(v("q"), Formula::bv(0, 8)));
        let unrelated = pmgr.make_predicate(Formula::eq(v("r"), Formula::bv(0, 8)));
        let independent = pmgr.make_predicate(Formula::ult(v("q"), v("s")));
        let all: Predicates = [on_interface.clone(), linked.clone(), unrelated.clone(), independent.clone()]
            .into_iter()
            .collect();

        let occurrence = OccurrenceComputer.relevant(&block(), &all).unwrap();
        assert_eq!(occurrence, [on_interface.clone()].into_iter().collect());

        let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
        let auxiliary = AuxiliaryComputer::new(solver).relevant(&block(), &all).unwrap();
        assert!(auxiliary.is_superset(&occurrence));
        assert!(auxiliary.is_subset(&all));
        assert!(!auxiliary.contains(&unrelated));
    }

    #[test]
    fn test_auxiliary_follows_dependencies() {
        let pmgr = PredicateManager::new();
        let kept = pmgr.make_predicate(Formula::ult(v("p"), v("q")));
        // q = 0 makes p < q false
        let bound = pmgr.make_predicate(Formula::eq(v("q"), Formula::bv(0, 8)));
        let all: Predicates = [kept, bound.clone()].into_iter().collect();
        let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
        let auxiliary = AuxiliaryComputer::new(solver).relevant(&block(), &all).unwrap();
        assert!(auxiliary.contains(&bound));
    }

    #[test]
    fn test_cache() {
        let pmgr = PredicateManager::new();
        let stats = Rc::new(Statistics::default());
        let computer = CachingRelevantPredicatesComputer::new(OccurrenceComputer, stats.clone());
        let all: Predicates = [pmgr.make_predicate(Formula::eq(v("t"), Formula::bv(1, 8)))]
            .into_iter()
            .collect();
        let first = computer.relevant(&block(), &all).unwrap();
        let second = computer.relevant(&block(), &all).unwrap();
        assert_eq!(first, second);
        assert_eq!(stats.relevant_computations.get(), 1);
        assert_eq!(stats.relevant_cache_hits.get(), 1);
    }
}
