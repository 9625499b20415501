//! Analysis options.
//!
//! Every option is a public field with a sensible default; front-ends map
//! their flags onto a [`PredicateConfig`] and call [`PredicateConfig::validated`].

use log::warn;

use crate::error::{CpaError, CpaResult};

/// How a path formula is turned into a boolean combination of predicates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbstractionType {
    /// All satisfying predicate assignments.
    Boolean,
    /// Each predicate checked on its own; conjunction of the implied literals.
    Cartesian,
    /// Cartesian for predicates sharing no variable with others, boolean for the rest.
    Hybrid,
}

/// Which locations end a block and trigger an abstraction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbstractionFrequency {
    EveryLocation,
    LoopHeadsAndFunctions,
    FunctionBoundaries,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    Sep,
    Abe,
}

/// Where new predicates from a refinement are added.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefinementScope {
    Global,
    Function,
    Location,
    LocationInstance,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InterpolationDirection {
    /// Strongest interpolants, projecting the prefix.
    Forward,
    /// Weakest interpolants, negating the projected suffix.
    Backward,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockFormulaStrategy {
    Stored,
    Recompute,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RelevantPredicatesStrategy {
    Occurrence,
    Auxiliary,
}

/// How lemma call sites are resolved while building path formulas.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LemmaMode {
    /// Keep the call, add the instantiated definition as a fact.
    Assert,
    /// Replace the call by the instantiated definition.
    Inline,
}

#[derive(Debug, Clone)]
pub struct PredicateConfig {
    pub abstraction_type: AbstractionType,
    pub abstraction_frequency: AbstractionFrequency,
    pub abstraction_at_targets: bool,
    pub symbolic_coverage: bool,
    pub merge: MergeStrategy,
    pub refinement_scope: RefinementScope,
    pub interpolation: InterpolationDirection,
    pub atomize_interpolants: bool,
    pub split_equalities: bool,
    pub block_formulas: BlockFormulaStrategy,
    pub aggressive_caching: bool,
    pub relevant_predicates: RelevantPredicatesStrategy,
    pub bam: bool,
    pub lemma_mode: LemmaMode,
    pub lemma_depth: usize,
    pub max_refinements: Option<usize>,
}

impl Default for PredicateConfig {
    fn default() -> Self {
        Self {
            abstraction_type: AbstractionType::Boolean,
            abstraction_frequency: AbstractionFrequency::LoopHeadsAndFunctions,
            abstraction_at_targets: true,
            symbolic_coverage: false,
            merge: MergeStrategy::Sep,
            refinement_scope: RefinementScope::Location,
            interpolation: InterpolationDirection::Backward,
            atomize_interpolants: true,
            split_equalities: false,
            block_formulas: BlockFormulaStrategy::Stored,
            aggressive_caching: false,
            relevant_predicates: RelevantPredicatesStrategy::Occurrence,
            bam: false,
            lemma_mode: LemmaMode::Assert,
            lemma_depth: 2,
            max_refinements: None,
        }
    }
}

impl PredicateConfig {
    /// Checks option combinations and returns the effective configuration.
    pub fn validated(&self) -> CpaResult<Self> {
        let mut config = self.clone();
        if config.bam && config.block_formulas == BlockFormulaStrategy::Stored {
            warn!("Block summaries hold block-local formulas, switching to recomputed block formulas");
            config.block_formulas = BlockFormulaStrategy::Recompute;
        }
        if config.merge == MergeStrategy::Abe && config.block_formulas == BlockFormulaStrategy::Stored {
            warn!("Merged states hold disjunctive formulas, switching to recomputed block formulas");
            config.block_formulas = BlockFormulaStrategy::Recompute;
        }
        if config.bam && config.merge == MergeStrategy::Abe {
            return Err(CpaError::config(
                "merging abstraction states is not supported together with block summaries",
            ));
        }
        if config.max_refinements == Some(0) {
            return Err(CpaError::config("max_refinements must be positive"));
        }
        Ok(config)
    }
}
