//! Successor computation along single edges.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{trace, warn};

use crate::blocks::{BlockPartitioning, BlockStack};
use crate::cfa::{Cfa, CfaEdge, NodeId, NodeKind};
use crate::config::AbstractionFrequency;
use crate::cpa::TransferRelation;
use crate::domain::{PredicateAbstractState, StateKind, StateRef};
use crate::error::CpaResult;
use crate::pathformula::{PathFormulaManager, SsaPathFormulaManager};
use crate::predicates::Precision;
use crate::stats::{inc, Statistics};

/// Decides which locations end a block.
pub trait BlockOperator {
    fn is_block_end(&self, cfa: &Cfa, node: NodeId) -> bool;
}

impl<B: BlockOperator + ?Sized> BlockOperator for Box<B> {
    fn is_block_end(&self, cfa: &Cfa, node: NodeId) -> bool {
        (**self).is_block_end(cfa, node)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct AbstractionPolicy {
    pub frequency: AbstractionFrequency,
    pub at_targets: bool,
}

impl BlockOperator for AbstractionPolicy {
    fn is_block_end(&self, cfa: &Cfa, node: NodeId) -> bool {
        if self.at_targets && cfa.is_error(node) {
            return true;
        }
        let kind = cfa.node(node).kind;
        match self.frequency {
            AbstractionFrequency::EveryLocation => true,
            AbstractionFrequency::LoopHeadsAndFunctions => kind != NodeKind::Plain,
            AbstractionFrequency::FunctionBoundaries => {
                matches!(kind, NodeKind::FunctionEntry | NodeKind::FunctionExit)
            }
        }
    }
}

/// Adds the call and return nodes of block summaries to another policy.
pub struct BamBlockOperator<B> {
    inner: B,
    partitioning: Rc<BlockPartitioning>,
    stack: BlockStack,
}

impl<B> BamBlockOperator<B> {
    pub fn new(inner: B, partitioning: Rc<BlockPartitioning>, stack: BlockStack) -> Self {
        Self {
            inner,
            partitioning,
            stack,
        }
    }
}

impl<B: BlockOperator> BlockOperator for BamBlockOperator<B> {
    fn is_block_end(&self, cfa: &Cfa, node: NodeId) -> bool {
        self.inner.is_block_end(cfa, node)
            || self.partitioning.is_call_node(node)
            || self
                .stack
                .current()
                .is_some_and(|b| b.is_call_node(node) || b.is_return_node(node))
    }
}

pub struct PredicateTransferRelation<B> {
    cfa: Rc<Cfa>,
    fmgr: Rc<SsaPathFormulaManager>,
    block_operator: B,
    stats: Rc<Statistics>,
}

impl<B: BlockOperator> PredicateTransferRelation<B> {
    pub fn new(cfa: Rc<Cfa>, fmgr: Rc<SsaPathFormulaManager>, block_operator: B, stats: Rc<Statistics>) -> Self {
        Self {
            cfa,
            fmgr,
            block_operator,
            stats,
        }
    }

    pub fn block_operator(&self) -> &B {
        &self.block_operator
    }
}

impl<B: BlockOperator> TransferRelation for PredicateTransferRelation<B> {
    type State = StateRef;
    type Precision = Precision;

    fn successors(&self, state: &StateRef, precision: &Precision, edge: &CfaEdge) -> CpaResult<Vec<StateRef>> {
        debug_assert_eq!(state.location(), edge.from);
        let pf = match self.fmgr.make_and_edge(state.path_formula(), edge, &precision.lemmas) {
            Ok(pf) => pf,
            Err(e) if e.is_local() => {
                warn!("Dropping successor: {}", e);
                inc(&self.stats.transfer_failures);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let node = edge.to;
        let abstraction = state.abstraction_formula().clone();
        let successor = if self.block_operator.is_block_end(&self.cfa, node) {
            let mut counts: BTreeMap<NodeId, u32> = (**state.location_counts()).clone();
            *counts.entry(node).or_insert(0) += 1;
            trace!("Block end at N{} after {} edges", node, pf.length());
            PredicateAbstractState::new(StateKind::ComputeAbstraction, node, pf, abstraction, Rc::new(counts))
        } else {
            PredicateAbstractState::new(
                StateKind::NonAbstraction,
                node,
                pf,
                abstraction,
                state.location_counts().clone(),
            )
        };
        Ok(vec![successor])
    }
}
