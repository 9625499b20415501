//! Per-run statistics counters.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub fn inc(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

pub fn add(counter: &Cell<usize>, n: usize) {
    counter.set(counter.get() + n);
}

#[derive(Debug, Default)]
pub struct Statistics {
    pub states_explored: Cell<usize>,
    pub states_covered: Cell<usize>,
    pub states_merged: Cell<usize>,
    pub transfer_failures: Cell<usize>,

    pub abstractions_computed: Cell<usize>,
    pub abstractions_cached: Cell<usize>,
    pub abstractions_false: Cell<usize>,
    pub abstraction_solver_calls: Cell<usize>,

    pub coverage_checks: Cell<usize>,
    pub coverage_cache_hits: Cell<usize>,
    pub coverage_solver_checks: Cell<usize>,

    pub relevant_computations: Cell<usize>,
    pub relevant_cache_hits: Cell<usize>,

    pub bam_cache_hits: Cell<usize>,
    pub bam_cache_misses: Cell<usize>,
    pub bam_recursive_lookups: Cell<usize>,
    pub bam_reiterations: Cell<usize>,
    pub bam_cache_clears: Cell<usize>,

    pub refinements: Cell<usize>,
    pub predicates_added: Cell<usize>,
    pub scope_fallbacks: Cell<usize>,
    pub lemma_refinements: Cell<usize>,

    /// Abstraction computations performed while analyzing each block.
    pub block_abstractions: RefCell<BTreeMap<String, usize>>,
}

impl Statistics {
    pub fn record_block_abstraction(&self, block: &str) {
        *self.block_abstractions.borrow_mut().entry(block.to_string()).or_default() += 1;
    }

    pub fn block_abstractions(&self, block: &str) -> usize {
        self.block_abstractions.borrow().get(block).copied().unwrap_or(0)
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "States explored:           {}", self.states_explored.get())?;
        writeln!(f, "  covered:                 {}", self.states_covered.get())?;
        writeln!(f, "  merged:                  {}", self.states_merged.get())?;
        writeln!(f, "Transfer failures:         {}", self.transfer_failures.get())?;
        writeln!(
            f,
            "Abstractions:              {} computed, {} cached, {} false",
            self.abstractions_computed.get(),
            self.abstractions_cached.get(),
            self.abstractions_false.get()
        )?;
        writeln!(f, "  solver calls:            {}", self.abstraction_solver_calls.get())?;
        writeln!(
            f,
            "Coverage checks:           {} ({} cached, {} by solver)",
            self.coverage_checks.get(),
            self.coverage_cache_hits.get(),
            self.coverage_solver_checks.get()
        )?;
        writeln!(
            f,
            "Relevant predicates:       {} computed, {} cached",
            self.relevant_computations.get(),
            self.relevant_cache_hits.get()
        )?;
        writeln!(
            f,
            "Block cache:               {} hits, {} misses, {} recursive, {} re-iterations, {} clears",
            self.bam_cache_hits.get(),
            self.bam_cache_misses.get(),
            self.bam_recursive_lookups.get(),
            self.bam_reiterations.get(),
            self.bam_cache_clears.get()
        )?;
        for (block, count) in self.block_abstractions.borrow().iter() {
            writeln!(f, "  abstractions in {}: {}", block, count)?;
        }
        writeln!(f, "Refinements:               {}", self.refinements.get())?;
        writeln!(f, "  predicates added:        {}", self.predicates_added.get())?;
        writeln!(f, "  scope fallbacks:         {}", self.scope_fallbacks.get())?;
        write!(f, "  lemma refinements:       {}", self.lemma_refinements.get())
    }
}
