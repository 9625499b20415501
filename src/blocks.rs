//! Block partitioning for block-summary caching.
//!
//! Every function except the program entry is one block. A block's entry is
//! the function entry node, its exit the function exit node, and its node set
//! includes every function it calls transitively.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use log::debug;

use crate::cfa::{Cfa, EdgeKind, NodeId};
use crate::formula::Symbol;

#[derive(Debug)]
pub struct Block {
    pub name: Rc<str>,
    pub entry: NodeId,
    pub exit: NodeId,
    pub nodes: BTreeSet<NodeId>,
    /// Variables on the edges of the block and on the calls into it.
    pub variables: BTreeSet<Symbol>,
}

impl Block {
    pub fn is_call_node(&self, node: NodeId) -> bool {
        node == self.entry
    }

    pub fn is_return_node(&self, node: NodeId) -> bool {
        node == self.exit
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Whether `symbol` is part of the block's vocabulary.
    pub fn mentions(&self, symbol: &Symbol) -> bool {
        self.variables.contains(symbol)
    }
}

#[derive(Debug, Default)]
pub struct BlockPartitioning {
    by_entry: BTreeMap<NodeId, Rc<Block>>,
}

impl BlockPartitioning {
    pub fn new(cfa: &Cfa) -> Self {
        let main = cfa.main().name.clone();
        let mut by_entry = BTreeMap::new();
        for info in cfa.functions() {
            if info.name == main {
                continue;
            }

            let mut functions = BTreeSet::new();
            let mut stack = vec![info.name.clone()];
            while let Some(f) = stack.pop() {
                if functions.insert(f.clone()) {
                    stack.extend(cfa.callees(&f));
                }
            }

            let nodes: BTreeSet<NodeId> = cfa
                .nodes()
                .iter()
                .filter(|n| functions.contains(&n.function))
                .map(|n| n.id)
                .collect();

            let mut variables = BTreeSet::new();
            for edge in cfa.edges() {
                let inside = nodes.contains(&edge.from) && nodes.contains(&edge.to);
                let enters = matches!(&edge.kind, EdgeKind::Call { callee, .. } if callee == &info.name);
                if inside || enters {
                    variables.extend(edge.symbols());
                }
            }

            debug!(
                "Block {}: {} nodes, {} variables",
                info.name,
                nodes.len(),
                variables.len()
            );
            by_entry.insert(
                info.entry,
                Rc::new(Block {
                    name: info.name.clone(),
                    entry: info.entry,
                    exit: info.exit,
                    nodes,
                    variables,
                }),
            );
        }
        Self { by_entry }
    }

    /// The block entered at `node`, if `node` is a block entry.
    pub fn block_at(&self, node: NodeId) -> Option<&Rc<Block>> {
        self.by_entry.get(&node)
    }

    pub fn is_call_node(&self, node: NodeId) -> bool {
        self.by_entry.contains_key(&node)
    }

    pub fn block(&self, name: &str) -> Option<&Rc<Block>> {
        self.by_entry.values().find(|b| &*b.name == name)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Rc<Block>> {
        self.by_entry.values()
    }
}

/// The blocks currently under analysis, innermost last.
#[derive(Debug, Clone, Default)]
pub struct BlockStack(Rc<RefCell<Vec<Rc<Block>>>>);

impl BlockStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, block: Rc<Block>) {
        self.0.borrow_mut().push(block);
    }

    pub fn pop(&self) -> Option<Rc<Block>> {
        self.0.borrow_mut().pop()
    }

    pub fn current(&self) -> Option<Rc<Block>> {
        self.0.borrow().last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.0.borrow().len()
    }
}
