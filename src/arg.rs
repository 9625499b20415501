//! Abstract reachability graph.
//!
//! States live in an arena and are addressed by [`ArgId`]. Removed states
//! keep their slot and are marked destroyed. Covered states stay in the
//! graph without successors and are put back on the waitlist when their
//! coverer is removed.

use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use log::trace;

use crate::cfa::{EdgeId, NodeId};
use crate::domain::StateRef;
use crate::predicates::Precision;
use crate::solver::Model;

pub type ArgId = usize;

/// A state on a program path, possibly inside a summarized block.
#[derive(Debug, Clone)]
pub struct PathElement {
    pub location: NodeId,
    /// The edge leading to this element; `None` for the first element.
    pub edge: Option<EdgeId>,
    pub state: StateRef,
    /// The graph state of this element; `None` inside a block summary.
    pub arg_state: Option<ArgId>,
    /// Graph state whose subtree holds this element.
    pub outer: ArgId,
}

impl PathElement {
    pub fn is_abstraction(&self) -> bool {
        self.state.is_abstraction()
    }

    /// Number of abstractions at this location on the path, including this one.
    pub fn instance(&self) -> u32 {
        self.state.location_count(self.location)
    }
}

#[derive(Debug, Clone)]
pub enum ArgEdge {
    Cfa(EdgeId),
    /// A block traversal; the path runs from the block entry to the child.
    Summary(Rc<Vec<PathElement>>),
}

#[derive(Debug)]
pub struct ArgState {
    pub id: ArgId,
    pub state: StateRef,
    /// Return sites of the pending calls, innermost last.
    pub call_stack: Rc<Vec<NodeId>>,
    pub precision: Rc<Precision>,
    pub is_target: bool,
    parents: Vec<(ArgId, ArgEdge)>,
    children: Vec<ArgId>,
    covered_by: Option<ArgId>,
    covering: Vec<ArgId>,
    destroyed: bool,
    queued: bool,
}

impl ArgState {
    pub fn location(&self) -> NodeId {
        self.state.location()
    }

    pub fn parents(&self) -> &[(ArgId, ArgEdge)] {
        &self.parents
    }

    pub fn children(&self) -> &[ArgId] {
        &self.children
    }

    pub fn covered_by(&self) -> Option<ArgId> {
        self.covered_by
    }

    pub fn is_covered(&self) -> bool {
        self.covered_by.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// A feasible path to a target.
#[derive(Debug, Clone)]
pub struct CounterexampleInfo {
    pub path: Vec<PathElement>,
    pub edges: Vec<EdgeId>,
    pub model: Model,
    /// Variable values read from the model, if it has the `variable = constant` shape.
    pub witness: Option<Model>,
}

#[derive(Debug, Default)]
pub struct Arg {
    states: Vec<ArgState>,
    waitlist: VecDeque<ArgId>,
    root: Option<ArgId>,
    counterexample: Option<CounterexampleInfo>,
}

impl Arg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: ArgId) -> &ArgState {
        &self.states[id]
    }

    pub fn root(&self) -> Option<ArgId> {
        self.root
    }

    pub fn add_root(&mut self, state: StateRef, call_stack: Rc<Vec<NodeId>>, precision: Rc<Precision>) -> ArgId {
        let id = self.push(state, call_stack, precision);
        self.root = Some(id);
        id
    }

    pub fn add_child(
        &mut self,
        parent: ArgId,
        edge: ArgEdge,
        state: StateRef,
        call_stack: Rc<Vec<NodeId>>,
        precision: Rc<Precision>,
    ) -> ArgId {
        let id = self.push(state, call_stack, precision);
        self.states[id].parents.push((parent, edge));
        self.states[parent].children.push(id);
        id
    }

    fn push(&mut self, state: StateRef, call_stack: Rc<Vec<NodeId>>, precision: Rc<Precision>) -> ArgId {
        let id = self.states.len();
        self.states.push(ArgState {
            id,
            state,
            call_stack,
            precision,
            is_target: false,
            parents: Vec::new(),
            children: Vec::new(),
            covered_by: None,
            covering: Vec::new(),
            destroyed: false,
            queued: false,
        });
        self.enqueue(id);
        id
    }

    fn enqueue(&mut self, id: ArgId) {
        let s = &mut self.states[id];
        if !s.queued {
            s.queued = true;
            self.waitlist.push_back(id);
        }
    }

    pub fn pop_waitlist(&mut self) -> Option<ArgId> {
        while let Some(id) = self.waitlist.pop_front() {
            let s = &mut self.states[id];
            s.queued = false;
            if !s.destroyed && s.covered_by.is_none() {
                return Some(id);
            }
        }
        None
    }

    pub fn waitlist_len(&self) -> usize {
        self.waitlist.len()
    }

    pub fn mark_target(&mut self, id: ArgId) {
        self.states[id].is_target = true;
    }

    /// Uncovered live states at `location` with the same call stack.
    pub fn reached_at(&self, location: NodeId, call_stack: &[NodeId]) -> Vec<ArgId> {
        self.live()
            .filter(|s| s.location() == location && *s.call_stack == call_stack && !s.is_covered())
            .map(|s| s.id)
            .collect()
    }

    pub fn live(&self) -> impl Iterator<Item = &ArgState> {
        self.states.iter().filter(|s| !s.destroyed)
    }

    pub fn set_covered(&mut self, id: ArgId, by: ArgId) {
        trace!("ARG state {} covered by {}", id, by);
        self.states[id].covered_by = Some(by);
        self.states[by].covering.push(id);
    }

    /// Replaces the abstract state of `id` by a merged one and recomputes its successors.
    pub fn replace_state(&mut self, id: ArgId, state: StateRef, extra_parent: Option<(ArgId, ArgEdge)>) {
        for child in std::mem::take(&mut self.states[id].children) {
            self.remove_subtree(child);
        }
        let s = &mut self.states[id];
        s.state = state;
        if let Some((parent, edge)) = extra_parent {
            s.parents.push((parent, edge));
            self.states[parent].children.push(id);
        }
        self.enqueue(id);
    }

    /// Removes `id` and everything below it. States covered by a removed
    /// state are uncovered and waiting again, and so are the surviving
    /// parents of removed states.
    pub fn remove_subtree(&mut self, id: ArgId) {
        let mut stack = vec![id];
        let mut removed = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if self.states[current].destroyed || !removed.insert(current) {
                continue;
            }
            self.states[current].destroyed = true;
            stack.extend(self.states[current].children.iter().copied());
        }
        for &r in &removed {
            let covering = std::mem::take(&mut self.states[r].covering);
            for c in covering {
                if !self.states[c].destroyed {
                    self.states[c].covered_by = None;
                    self.enqueue(c);
                }
            }
            if let Some(by) = self.states[r].covered_by.take() {
                self.states[by].covering.retain(|&c| c != r);
            }
            let parents: Vec<ArgId> = self.states[r].parents.iter().map(|(p, _)| *p).collect();
            for p in parents {
                self.states[p].children.retain(|&c| c != r);
                if !self.states[p].destroyed {
                    self.enqueue(p);
                }
            }
        }
        trace!("Removed {} ARG states below {}", removed.len(), id);
    }

    /// Drops the successors of `id` and schedules it again under `precision`.
    pub fn remove_children_and_readd(&mut self, id: ArgId, precision: Rc<Precision>) {
        for child in self.states[id].children.clone() {
            self.remove_subtree(child);
        }
        if let Some(by) = self.states[id].covered_by.take() {
            self.states[by].covering.retain(|&c| c != id);
        }
        self.states[id].precision = precision;
        self.enqueue(id);
    }

    /// States from the root to `target`, following first parents.
    pub fn path_to(&self, target: ArgId) -> Vec<(ArgId, Option<ArgEdge>)> {
        let mut path = Vec::new();
        let mut current = target;
        // a first parent is always older than its child
        while let Some((parent, edge)) = self.states[current].parents.first() {
            path.push((current, Some(edge.clone())));
            current = *parent;
        }
        path.push((current, None));
        path.reverse();
        path
    }

    /// Every path from the root to `target`, at most `limit` of them.
    ///
    /// A state has several parents once other states were merged into it.
    pub fn paths_to(&self, target: ArgId, limit: usize) -> Vec<Vec<(ArgId, Option<ArgEdge>)>> {
        let mut out = Vec::new();
        self.collect_paths(target, &mut Vec::new(), &mut out, limit);
        out
    }

    /// `suffix` holds the elements after `id`, last element first.
    fn collect_paths(
        &self,
        id: ArgId,
        suffix: &mut Vec<(ArgId, Option<ArgEdge>)>,
        out: &mut Vec<Vec<(ArgId, Option<ArgEdge>)>>,
        limit: usize,
    ) {
        if out.len() >= limit || suffix.iter().any(|(s, _)| *s == id) {
            return;
        }
        let parents = &self.states[id].parents;
        if parents.is_empty() {
            let mut path = vec![(id, None)];
            path.extend(suffix.iter().rev().cloned());
            out.push(path);
            return;
        }
        for (parent, edge) in parents {
            suffix.push((id, Some(edge.clone())));
            self.collect_paths(*parent, suffix, out, limit);
            suffix.pop();
        }
    }

    /// The path to `target` with block summaries spliced in.
    pub fn flattened_path(&self, target: ArgId) -> Vec<PathElement> {
        self.flatten(self.path_to(target))
    }

    /// Like [`Arg::flattened_path`], once per path of [`Arg::paths_to`].
    pub fn flattened_paths(&self, target: ArgId, limit: usize) -> Vec<Vec<PathElement>> {
        self.paths_to(target, limit)
            .into_iter()
            .map(|path| self.flatten(path))
            .collect()
    }

    fn flatten(&self, path: Vec<(ArgId, Option<ArgEdge>)>) -> Vec<PathElement> {
        let mut out: Vec<PathElement> = Vec::new();
        for (id, edge) in path {
            let s = &self.states[id];
            match edge {
                None => out.push(self.element(id, None)),
                Some(ArgEdge::Cfa(e)) => out.push(self.element(id, Some(e))),
                Some(ArgEdge::Summary(inner)) => {
                    let outer = out.last().map_or(id, |e| e.outer);
                    if let Some((last, middle)) = inner.split_last() {
                        for element in middle.iter().skip(1) {
                            out.push(PathElement {
                                arg_state: None,
                                outer,
                                ..element.clone()
                            });
                        }
                        out.push(PathElement {
                            location: s.location(),
                            edge: last.edge,
                            state: s.state.clone(),
                            arg_state: Some(id),
                            outer: id,
                        });
                    }
                }
            }
        }
        out
    }

    fn element(&self, id: ArgId, edge: Option<EdgeId>) -> PathElement {
        let s = &self.states[id];
        PathElement {
            location: s.location(),
            edge,
            state: s.state.clone(),
            arg_state: Some(id),
            outer: id,
        }
    }

    pub fn attach_counterexample(&mut self, info: CounterexampleInfo) {
        self.counterexample = Some(info);
    }

    pub fn counterexample(&self) -> Option<&CounterexampleInfo> {
        self.counterexample.as_ref()
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AbstractionFormula, PredicateAbstractState};
    use crate::formula::ssa::SsaMap;
    use crate::formula::Formula;
    use crate::pathformula::PathFormula;
    use crate::predicates::PredicateManager;

    fn state(pmgr: &PredicateManager, location: NodeId) -> StateRef {
        let pf = PathFormula::new(Formula::tt(), SsaMap::new(), 0);
        let top = Rc::new(AbstractionFormula::top(pmgr, pf.clone()));
        PredicateAbstractState::abstraction(location, pf, top, Rc::default())
    }

    fn element(pmgr: &PredicateManager, location: NodeId, edge: Option<EdgeId>) -> PathElement {
        PathElement {
            location,
            edge,
            state: state(pmgr, location),
            arg_state: Some(0),
            outer: 0,
        }
    }

    #[test]
    fn test_uncover_on_removal() {
        let pmgr = PredicateManager::new();
        let mut arg = Arg::new();
        let p = Rc::new(Precision::default());
        let root = arg.add_root(state(&pmgr, 0), Rc::default(), p.clone());
        assert_eq!(arg.pop_waitlist(), Some(root));
        let a = arg.add_child(root, ArgEdge::Cfa(0), state(&pmgr, 1), Rc::default(), p.clone());
        let b = arg.add_child(root, ArgEdge::Cfa(1), state(&pmgr, 1), Rc::default(), p.clone());
        arg.set_covered(b, a);
        assert_eq!(arg.reached_at(1, &[]), vec![a]);

        assert_eq!(arg.pop_waitlist(), Some(a));
        // covered states are skipped
        assert_eq!(arg.pop_waitlist(), None);

        arg.remove_subtree(a);
        assert!(arg.state(a).is_destroyed());
        assert!(!arg.state(b).is_covered());
        assert_eq!(arg.state(root).children(), &[b]);
        let mut popped = Vec::new();
        while let Some(id) = arg.pop_waitlist() {
            popped.push(id);
        }
        assert!(popped.contains(&b));
    }

    #[test]
    fn test_remove_children_and_readd() {
        let pmgr = PredicateManager::new();
        let mut arg = Arg::new();
        let p = Rc::new(Precision::default());
        let root = arg.add_root(state(&pmgr, 0), Rc::default(), p.clone());
        let a = arg.add_child(root, ArgEdge::Cfa(0), state(&pmgr, 1), Rc::default(), p.clone());
        let c = arg.add_child(a, ArgEdge::Cfa(1), state(&pmgr, 2), Rc::default(), p.clone());
        while arg.pop_waitlist().is_some() {}

        let refined = Rc::new(Precision::default());
        arg.remove_children_and_readd(root, refined.clone());
        assert!(arg.state(a).is_destroyed());
        assert!(arg.state(c).is_destroyed());
        assert_eq!(arg.len(), 1);
        assert!(Rc::ptr_eq(&arg.state(root).precision, &refined));
        assert_eq!(arg.pop_waitlist(), Some(root));
        assert_eq!(arg.pop_waitlist(), None);
    }

    #[test]
    fn test_paths_through_merged_state() {
        let pmgr = PredicateManager::new();
        let mut arg = Arg::new();
        let p = Rc::new(Precision::default());
        let root = arg.add_root(state(&pmgr, 0), Rc::default(), p.clone());
        let a = arg.add_child(root, ArgEdge::Cfa(0), state(&pmgr, 1), Rc::default(), p.clone());
        let b = arg.add_child(root, ArgEdge::Cfa(1), state(&pmgr, 2), Rc::default(), p.clone());
        let joined = arg.add_child(a, ArgEdge::Cfa(2), state(&pmgr, 3), Rc::default(), p.clone());
        arg.replace_state(joined, state(&pmgr, 3), Some((b, ArgEdge::Cfa(3))));
        let target = arg.add_child(joined, ArgEdge::Cfa(4), state(&pmgr, 4), Rc::default(), p);

        let paths = arg.flattened_paths(target, 8);
        let edges: Vec<Vec<EdgeId>> = paths
            .iter()
            .map(|path| path.iter().filter_map(|e| e.edge).collect())
            .collect();
        assert_eq!(edges, vec![vec![0, 2, 4], vec![1, 3, 4]]);
        assert_eq!(arg.paths_to(target, 1).len(), 1);
        let first: Vec<EdgeId> = arg.flattened_path(target).iter().filter_map(|e| e.edge).collect();
        assert_eq!(first, edges[0]);
    }

    #[test]
    fn test_flattened_path_splices_summaries() {
        let pmgr = PredicateManager::new();
        let mut arg = Arg::new();
        let p = Rc::new(Precision::default());
        let root = arg.add_root(state(&pmgr, 0), Rc::default(), p.clone());
        let entry = arg.add_child(root, ArgEdge::Cfa(7), state(&pmgr, 2), Rc::default(), p.clone());
        let inner = vec![
            element(&pmgr, 2, None),
            element(&pmgr, 4, Some(8)),
            element(&pmgr, 3, Some(9)),
        ];
        let exit = arg.add_child(
            entry,
            ArgEdge::Summary(Rc::new(inner)),
            state(&pmgr, 3),
            Rc::default(),
            p.clone(),
        );
        let ret = arg.add_child(exit, ArgEdge::Cfa(10), state(&pmgr, 5), Rc::default(), p);

        let path = arg.flattened_path(ret);
        let locations: Vec<NodeId> = path.iter().map(|e| e.location).collect();
        let edges: Vec<Option<EdgeId>> = path.iter().map(|e| e.edge).collect();
        assert_eq!(locations, vec![0, 2, 4, 3, 5]);
        assert_eq!(edges, vec![None, Some(7), Some(8), Some(9), Some(10)]);
        assert_eq!(path[2].arg_state, None);
        assert_eq!(path[2].outer, entry);
        assert_eq!(path[3].arg_state, Some(exit));
        assert_eq!(path[4].outer, ret);
    }
}
