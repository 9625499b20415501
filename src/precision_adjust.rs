//! Abstraction computation at block ends.

use std::rc::Rc;

use log::trace;

use crate::abstraction::AbstractionManager;
use crate::blocks::BlockStack;
use crate::cfa::Cfa;
use crate::cpa::{PrecisionAdjustment, PrecisionResult};
use crate::domain::{PredicateAbstractState, StateKind, StateRef};
use crate::error::CpaResult;
use crate::pathformula::{PathFormulaManager, SsaPathFormulaManager};
use crate::predicates::Precision;
use crate::relevant::RelevantPredicatesComputer;
use crate::stats::Statistics;

pub struct PredicatePrecisionAdjustment {
    cfa: Rc<Cfa>,
    amgr: Rc<AbstractionManager>,
    fmgr: Rc<SsaPathFormulaManager>,
    relevant: Rc<dyn RelevantPredicatesComputer>,
    block_stack: BlockStack,
    stats: Rc<Statistics>,
}

impl PredicatePrecisionAdjustment {
    pub fn new(
        cfa: Rc<Cfa>,
        amgr: Rc<AbstractionManager>,
        fmgr: Rc<SsaPathFormulaManager>,
        relevant: Rc<dyn RelevantPredicatesComputer>,
        block_stack: BlockStack,
        stats: Rc<Statistics>,
    ) -> Self {
        Self {
            cfa,
            amgr,
            fmgr,
            relevant,
            block_stack,
            stats,
        }
    }
}

impl PrecisionAdjustment for PredicatePrecisionAdjustment {
    type State = StateRef;
    type Precision = Precision;

    fn adjust(&self, state: StateRef, precision: &Precision) -> CpaResult<PrecisionResult<StateRef>> {
        if state.kind() != StateKind::ComputeAbstraction {
            return Ok(PrecisionResult::Continue(state));
        }
        let node = state.location();
        let function = self.cfa.function_of(node);
        let mut predicates = precision
            .predicates
            .for_location(node, function, state.location_count(node));

        let block = self.block_stack.current();
        if let Some(block) = &block {
            if block.is_call_node(node) || block.is_return_node(node) {
                predicates = self.relevant.relevant(block, &predicates)?;
            }
        }

        let (abstraction, cached) =
            self.amgr
                .build_abstraction(state.abstraction_formula(), state.path_formula(), &predicates)?;
        if !cached {
            let owner = block.as_ref().map_or(self.cfa.main().name.as_ref(), |b| b.name.as_ref());
            self.stats.record_block_abstraction(owner);
        }
        if abstraction.is_false() {
            trace!("N{} is unreachable", node);
            return Ok(PrecisionResult::Unreachable);
        }
        let pf = self.fmgr.empty_with(state.path_formula().ssa().clone());
        Ok(PrecisionResult::Continue(PredicateAbstractState::abstraction(
            node,
            pf,
            abstraction,
            state.location_counts().clone(),
        )))
    }
}
