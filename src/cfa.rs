//! Control-flow automata.
//!
//! A [`Cfa`] is read-only once built. Nodes and edges are stored in arenas
//! and addressed by index; every node belongs to exactly one function.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::error::{CpaError, CpaResult};
use crate::formula::{Formula, Symbol};

pub type NodeId = usize;
pub type EdgeId = usize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Plain,
    LoopHead,
    FunctionEntry,
    FunctionExit,
}

#[derive(Debug, Clone)]
pub struct CfaNode {
    pub id: NodeId,
    pub function: Rc<str>,
    pub kind: NodeKind,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    Blank,
    Assume {
        condition: Formula,
        truth: bool,
    },
    Assign {
        target: Symbol,
        value: Formula,
    },
    Havoc(Symbol),
    /// Parameter passing into `callee`; the matching return lands at `return_site`.
    Call {
        callee: Rc<str>,
        args: Vec<(Symbol, Formula)>,
        return_site: NodeId,
    },
    /// Back from a function exit, optionally storing a callee value in a caller variable.
    Return {
        call_site: NodeId,
        assign: Option<(Symbol, Formula)>,
    },
}

#[derive(Debug, Clone)]
pub struct CfaEdge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

impl CfaEdge {
    /// Symbols read or written by this edge.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        match &self.kind {
            EdgeKind::Blank => {}
            EdgeKind::Assume { condition, .. } => out.extend(condition.free_symbols()),
            EdgeKind::Assign { target, value } => {
                out.push(target.clone());
                out.extend(value.free_symbols());
            }
            EdgeKind::Havoc(s) => out.push(s.clone()),
            EdgeKind::Call { args, .. } => {
                for (formal, actual) in args {
                    out.push(formal.clone());
                    out.extend(actual.free_symbols());
                }
            }
            EdgeKind::Return { assign, .. } => {
                if let Some((target, value)) = assign {
                    out.push(target.clone());
                    out.extend(value.free_symbols());
                }
            }
        }
        out
    }
}

impl Display for CfaEdge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{} -> N{}: ", self.from, self.to)?;
        match &self.kind {
            EdgeKind::Blank => write!(f, "skip"),
            EdgeKind::Assume { condition, truth: true } => write!(f, "[{}]", condition),
            EdgeKind::Assume { condition, truth: false } => write!(f, "[!{}]", condition),
            EdgeKind::Assign { target, value } => write!(f, "{} := {}", target, value),
            EdgeKind::Havoc(s) => write!(f, "{} := *", s),
            EdgeKind::Call { callee, args, .. } => {
                write!(f, "call {}(", callee)?;
                for (i, (formal, actual)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} := {}", formal, actual)?;
                }
                write!(f, ")")
            }
            EdgeKind::Return { assign: None, .. } => write!(f, "return"),
            EdgeKind::Return {
                assign: Some((target, value)),
                ..
            } => write!(f, "return {} := {}", target, value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: Rc<str>,
    pub entry: NodeId,
    pub exit: NodeId,
}

#[derive(Debug)]
pub struct Cfa {
    nodes: Vec<CfaNode>,
    edges: Vec<CfaEdge>,
    leaving: Vec<Vec<EdgeId>>,
    entering: Vec<Vec<EdgeId>>,
    functions: BTreeMap<Rc<str>, FunctionInfo>,
    main: Rc<str>,
}

impl Cfa {
    pub fn node(&self, id: NodeId) -> &CfaNode {
        &self.nodes[id]
    }

    pub fn edge(&self, id: EdgeId) -> &CfaEdge {
        &self.edges[id]
    }

    pub fn nodes(&self) -> &[CfaNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[CfaEdge] {
        &self.edges
    }

    pub fn leaving(&self, node: NodeId) -> impl Iterator<Item = &CfaEdge> + '_ {
        self.leaving[node].iter().map(move |&e| &self.edges[e])
    }

    pub fn entering(&self, node: NodeId) -> impl Iterator<Item = &CfaEdge> + '_ {
        self.entering[node].iter().map(move |&e| &self.edges[e])
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values()
    }

    pub fn main(&self) -> &FunctionInfo {
        &self.functions[&self.main]
    }

    pub fn function_of(&self, node: NodeId) -> &str {
        &self.nodes[node].function
    }

    pub fn is_error(&self, node: NodeId) -> bool {
        self.nodes[node].is_error
    }

    /// Functions called directly from `function`.
    pub fn callees(&self, function: &str) -> Vec<Rc<str>> {
        let mut out: Vec<Rc<str>> = Vec::new();
        for edge in &self.edges {
            if let EdgeKind::Call { callee, .. } = &edge.kind {
                if self.function_of(edge.from) == function && !out.contains(callee) {
                    out.push(callee.clone());
                }
            }
        }
        out
    }
}

struct PendingCall {
    from: NodeId,
    return_site: NodeId,
    callee: Rc<str>,
    args: Vec<(Symbol, Formula)>,
    result: Option<(Symbol, Formula)>,
}

/// Incremental construction of a [`Cfa`].
#[derive(Default)]
pub struct CfaBuilder {
    nodes: Vec<CfaNode>,
    edges: Vec<(NodeId, NodeId, EdgeKind)>,
    functions: BTreeMap<Rc<str>, FunctionInfo>,
    calls: Vec<PendingCall>,
}

impl CfaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, function: &str, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(CfaNode {
            id,
            function: Rc::from(function),
            kind,
            is_error: false,
        });
        id
    }

    /// Declares a function and returns its entry and exit nodes.
    pub fn function(&mut self, name: &str) -> (NodeId, NodeId) {
        let entry = self.add_node(name, NodeKind::FunctionEntry);
        let exit = self.add_node(name, NodeKind::FunctionExit);
        self.functions.insert(
            Rc::from(name),
            FunctionInfo {
                name: Rc::from(name),
                entry,
                exit,
            },
        );
        (entry, exit)
    }

    pub fn node(&mut self, function: &str) -> NodeId {
        self.add_node(function, NodeKind::Plain)
    }

    pub fn loop_head(&mut self, function: &str) -> NodeId {
        self.add_node(function, NodeKind::LoopHead)
    }

    pub fn error_node(&mut self, function: &str) -> NodeId {
        let id = self.add_node(function, NodeKind::Plain);
        self.nodes[id].is_error = true;
        id
    }

    pub fn blank(&mut self, from: NodeId, to: NodeId) {
        self.edges.push((from, to, EdgeKind::Blank));
    }

    pub fn assume(&mut self, from: NodeId, to: NodeId, condition: Formula, truth: bool) {
        self.edges.push((from, to, EdgeKind::Assume { condition, truth }));
    }

    /// Both branches of a condition.
    pub fn branch(&mut self, from: NodeId, condition: Formula, then: NodeId, otherwise: NodeId) {
        self.assume(from, then, condition.clone(), true);
        self.assume(from, otherwise, condition, false);
    }

    pub fn assign(&mut self, from: NodeId, to: NodeId, target: &Symbol, value: Formula) {
        self.edges.push((
            from,
            to,
            EdgeKind::Assign {
                target: target.clone(),
                value,
            },
        ));
    }

    pub fn havoc(&mut self, from: NodeId, to: NodeId, target: &Symbol) {
        self.edges.push((from, to, EdgeKind::Havoc(target.clone())));
    }

    /// A call from `from` to `callee`, returning to `return_site`.
    ///
    /// `result` stores a callee expression, evaluated at the callee exit, in
    /// a caller variable.
    pub fn call(
        &mut self,
        from: NodeId,
        return_site: NodeId,
        callee: &str,
        args: Vec<(Symbol, Formula)>,
        result: Option<(Symbol, Formula)>,
    ) {
        self.calls.push(PendingCall {
            from,
            return_site,
            callee: Rc::from(callee),
            args,
            result,
        });
    }

    pub fn build(self, main: &str) -> CpaResult<Cfa> {
        let main: Rc<str> = Rc::from(main);
        if !self.functions.contains_key(&main) {
            return Err(CpaError::config(format!("entry function `{}` is not defined", main)));
        }
        let mut edges = self.edges;
        for call in self.calls {
            let info = self
                .functions
                .get(&call.callee)
                .ok_or_else(|| CpaError::config(format!("call to undefined function `{}`", call.callee)))?;
            edges.push((
                call.from,
                info.entry,
                EdgeKind::Call {
                    callee: call.callee.clone(),
                    args: call.args,
                    return_site: call.return_site,
                },
            ));
            edges.push((
                info.exit,
                call.return_site,
                EdgeKind::Return {
                    call_site: call.from,
                    assign: call.result,
                },
            ));
        }

        let mut leaving = vec![Vec::new(); self.nodes.len()];
        let mut entering = vec![Vec::new(); self.nodes.len()];
        let edges: Vec<CfaEdge> = edges
            .into_iter()
            .enumerate()
            .map(|(id, (from, to, kind))| {
                leaving[from].push(id);
                entering[to].push(id);
                CfaEdge { id, from, to, kind }
            })
            .collect();

        Ok(Cfa {
            nodes: self.nodes,
            edges,
            leaving,
            entering,
            functions: self.functions,
            main,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_call() {
        let x = Symbol::bv("x", 8);
        let p = Symbol::bv("p", 8);
        let mut b = CfaBuilder::new();
        let (m_entry, m_exit) = b.function("main");
        let (f_entry, f_exit) = b.function("f");
        let ret = b.node("main");
        b.call(m_entry, ret, "f", vec![(p.clone(), Formula::var(x.clone()))], None);
        b.blank(ret, m_exit);
        b.assign(f_entry, f_exit, &p, Formula::bv(0, 8));
        let cfa = b.build("main").unwrap();

        assert_eq!(cfa.main().entry, m_entry);
        let call = cfa.leaving(m_entry).next().unwrap();
        assert_eq!(call.to, f_entry);
        let back = cfa.leaving(f_exit).next().unwrap();
        assert_eq!(back.to, ret);
        assert!(matches!(back.kind, EdgeKind::Return { call_site, .. } if call_site == m_entry));
        assert_eq!(cfa.callees("main"), vec![Rc::from("f")]);
        assert_eq!(call.to_string(), "N0 -> N2: call f(p := x)");
    }

    #[test]
    fn test_undefined_callee() {
        let mut b = CfaBuilder::new();
        let (entry, exit) = b.function("main");
        b.call(entry, exit, "g", Vec::new(), None);
        assert!(matches!(b.build("main"), Err(CpaError::Configuration(_))));

        let b = CfaBuilder::new();
        assert!(matches!(b.build("main"), Err(CpaError::Configuration(_))));
    }
}
