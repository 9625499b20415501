//! Block-summary caching.
//!
//! When exploration reaches the entry of a block, the entry state and
//! precision are reduced to the block's vocabulary and used as a cache key.
//! On a miss the block is analyzed in a separate graph rooted at the reduced
//! state, and the states reaching the block exit are stored. Every use of a
//! summary expands the stored exits into the caller context.
//!
//! A lookup of a key whose analysis is still running is a recursive call.
//! It returns the exits found so far, and the running analysis repeats
//! until its exits stop growing.

pub mod cache;
pub mod reducer;

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::algorithm::{ReachabilityAlgorithm, ReachabilityResult};
use crate::arg::Arg;
use crate::blocks::{Block, BlockPartitioning};
use crate::cfa::NodeId;
use crate::cpa::PredicateCpa;
use crate::domain::StateRef;
use crate::error::{CpaError, CpaResult};
use crate::predicates::Precision;
use crate::stats::{inc, Statistics};

use self::cache::{BlockCache, CacheKey, SummaryExit};
use self::reducer::{BamReducer, Reduction};

pub struct BamCpa {
    partitioning: Rc<BlockPartitioning>,
    reducer: BamReducer,
    cache: RefCell<BlockCache>,
    stats: Rc<Statistics>,
}

impl BamCpa {
    pub fn new(partitioning: Rc<BlockPartitioning>, cpa: &PredicateCpa) -> Self {
        Self {
            partitioning,
            reducer: BamReducer::new(cpa.pmgr.clone(), cpa.fmgr.clone(), cpa.relevant.clone()),
            cache: RefCell::new(BlockCache::new()),
            stats: cpa.stats.clone(),
        }
    }

    pub fn partitioning(&self) -> &BlockPartitioning {
        &self.partitioning
    }

    pub fn reducer(&self) -> &BamReducer {
        &self.reducer
    }

    /// The block entered at `node`, if any.
    pub fn block_at(&self, node: NodeId) -> Option<Rc<Block>> {
        self.partitioning.block_at(node).cloned()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Drops every stored summary.
    pub fn clear_cache(&self) {
        let mut cache = self.cache.borrow_mut();
        debug!("Clearing {} block summaries", cache.len());
        cache.clear();
        inc(&self.stats.bam_cache_clears);
    }

    /// Exits of `block` entered in `entry`, in caller vocabulary.
    pub fn summarize(
        &self,
        cpa: &PredicateCpa,
        block: &Rc<Block>,
        entry: &StateRef,
        precision: &Precision,
    ) -> CpaResult<Vec<SummaryExit>> {
        let reduction = self.reducer.reduce(block, entry, precision)?;
        let key = CacheKey {
            block: block.name.clone(),
            region: reduction.state.abstraction_formula().region(),
            precision: reduction.precision.clone(),
        };
        let exits = self.lookup(cpa, block, &key, &reduction)?;
        exits
            .into_iter()
            .map(|exit| {
                let state = if exit.is_target {
                    self.reducer.expand_target(entry, &exit.state)
                } else {
                    self.reducer.expand(block, entry, &reduction.relevant, &exit.state)?
                };
                Ok(SummaryExit {
                    state,
                    path: exit.path,
                    is_target: exit.is_target,
                })
            })
            .collect()
    }

    fn lookup(
        &self,
        cpa: &PredicateCpa,
        block: &Rc<Block>,
        key: &CacheKey,
        reduction: &Reduction,
    ) -> CpaResult<Vec<SummaryExit>> {
        if let Some(entry) = self.cache.borrow_mut().get_mut(key) {
            if entry.complete {
                inc(&self.stats.bam_cache_hits);
                debug!("Summary of {} reused ({} exits)", block.name, entry.exits.len());
            } else {
                inc(&self.stats.bam_recursive_lookups);
                debug!("Recursive use of {} with {} exits so far", block.name, entry.exits.len());
                entry.reiterate = true;
            }
            return Ok(entry.exits.clone());
        }

        inc(&self.stats.bam_cache_misses);
        let start = self.cache.borrow_mut().open(key.clone());
        cpa.block_stack.push(block.clone());
        let result = self.analyze(cpa, block, key, reduction, start);
        cpa.block_stack.pop();

        let mut cache = self.cache.borrow_mut();
        match result {
            Ok(exits) => {
                if let Some(entry) = cache.get_mut(key) {
                    entry.complete = true;
                }
                Ok(exits)
            }
            Err(e) => {
                cache.remove(key);
                Err(e)
            }
        }
    }

    fn analyze(
        &self,
        cpa: &PredicateCpa,
        block: &Block,
        key: &CacheKey,
        reduction: &Reduction,
        start: u64,
    ) -> CpaResult<Vec<SummaryExit>> {
        let precision = Rc::new(reduction.precision.clone());
        loop {
            let mut arg = Arg::new();
            let root = arg.add_root(reduction.state.clone(), Rc::default(), precision.clone());
            let result = ReachabilityAlgorithm::new(cpa, Some(self)).run(&mut arg, Some(block.exit))?;

            let found: Vec<SummaryExit> = match result {
                ReachabilityResult::Target(target) => vec![SummaryExit {
                    state: arg.state(target).state.clone(),
                    path: Rc::new(arg.flattened_path(target)),
                    is_target: true,
                }],
                ReachabilityResult::Complete => arg
                    .live()
                    .filter(|s| s.id != root && s.location() == block.exit && s.call_stack.is_empty())
                    .filter(|s| !s.is_covered())
                    .map(|s| SummaryExit {
                        state: s.state.clone(),
                        path: Rc::new(arg.flattened_path(s.id)),
                        is_target: false,
                    })
                    .collect(),
            };
            let is_target = matches!(result, ReachabilityResult::Target(_));

            let mut cache = self.cache.borrow_mut();
            let entry = cache.get_mut(key).ok_or_else(|| {
                CpaError::CacheInconsistency(format!("summary of {} vanished during its analysis", block.name))
            })?;
            let again = entry.reiterate && !is_target;
            entry.reiterate = false;
            if is_target {
                entry.exits = found;
                return Ok(entry.exits.clone());
            }

            // exits only accumulate, so the iteration reaches a fixpoint
            let known = entry.exit_regions();
            let before = entry.exits.len();
            for exit in found {
                if !known.contains(&exit.state.abstraction_formula().region()) {
                    entry.exits.push(exit);
                }
            }
            if !again || entry.exits.len() == before {
                debug!("Block {} summarized with {} exits", block.name, entry.exits.len());
                return Ok(entry.exits.clone());
            }
            drop(cache);

            inc(&self.stats.bam_reiterations);
            self.cache.borrow_mut().remove_newer_than(start);
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::cfa::{Cfa, CfaBuilder};
    use crate::config::PredicateConfig;
    use crate::formula::{Formula, Symbol};
    use crate::lemma::LemmaSet;
    use crate::shutdown::ShutdownNotifier;
    use crate::solver::{BddSolver, Solver};

    /// `main: f(x); f(x)` with `f(p): t := p`.
    fn program() -> Cfa {
        let x = Symbol::bv("x", 8);
        let p = Symbol::bv("p", 8);
        let t = Symbol::bv("t", 8);
        let mut b = CfaBuilder::new();
        let (m_entry, m_exit) = b.function("main");
        let (f_entry, f_exit) = b.function("f");
        let r1 = b.node("main");
        b.call(m_entry, r1, "f", vec![(p.clone(), Formula::var(x.clone()))], None);
        b.call(r1, m_exit, "f", vec![(p.clone(), Formula::var(x))], None);
        b.assign(f_entry, f_exit, &t, Formula::var(p));
        b.build("main").unwrap()
    }

    fn cpa() -> PredicateCpa {
        let config = PredicateConfig {
            bam: true,
            ..Default::default()
        };
        let solver: Rc<dyn Solver> = Rc::new(BddSolver::new(ShutdownNotifier::new()));
        PredicateCpa::new(Rc::new(program()), &config, solver, LemmaSet::new()).unwrap()
    }

    #[test]
    fn test_second_call_hits_cache() {
        let cpa = cpa();
        let bam = BamCpa::new(cpa.blocks.clone().unwrap(), &cpa);
        let mut arg = Arg::new();
        arg.add_root(cpa.initial_state(), Rc::default(), Rc::default());
        let result = ReachabilityAlgorithm::new(&cpa, Some(&bam)).run(&mut arg, None).unwrap();

        assert_eq!(result, ReachabilityResult::Complete);
        assert_eq!(cpa.stats.bam_cache_misses.get(), 1);
        assert_eq!(cpa.stats.bam_cache_hits.get(), 1);
        assert_eq!(bam.cache_size(), 1);
        assert_eq!(cpa.block_stack.depth(), 0);
        assert!(arg.live().any(|s| s.location() == cpa.cfa.main().exit));

        bam.clear_cache();
        assert_eq!(bam.cache_size(), 0);
        assert_eq!(cpa.stats.bam_cache_clears.get(), 1);
    }
}
