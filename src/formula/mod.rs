//! Typed formula algebra over booleans and fixed-width bit-vectors.
//!
//! A [`Formula`] is an immutable, reference-counted tree with structural
//! equality and hashing, so formulas can be used directly as map keys
//! (abstraction cache, predicate registry, block cache).
//!
//! Node variants:
//!
//! - [`Node::Var`]: a free (or bound) variable, see [`Symbol`],
//! - [`Node::Const`]: a boolean or bit-vector literal,
//! - [`Node::App`]: an operator applied to arguments; uninterpreted
//!   functions ([`Op::Call`]) model lemma call sites,
//! - [`Node::Quant`]: a quantifier binding a list of symbols.
//!
//! Constructors perform cheap local simplifications (constant folding of
//! connectives, flattening of conjunctions) but never reorder arguments.

use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use num_bigint::BigUint;
use num_traits::{One, Zero};

pub mod parser;
pub mod simplify;
pub mod smtlib;
pub mod ssa;
pub mod visit;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sort {
    Bool,
    BitVec(u32),
}

impl Sort {
    pub fn is_bool(self) -> bool {
        matches!(self, Sort::Bool)
    }

    pub fn width(self) -> Option<u32> {
        match self {
            Sort::Bool => None,
            Sort::BitVec(w) => Some(w),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    name: Rc<str>,
    sort: Sort,
}

impl Symbol {
    pub fn new(name: &str, sort: Sort) -> Self {
        Self {
            name: Rc::from(name),
            sort,
        }
    }

    pub fn bool(name: &str) -> Self {
        Self::new(name, Sort::Bool)
    }

    pub fn bv(name: &str, width: u32) -> Self {
        Self::new(name, Sort::BitVec(width))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }

    pub fn with_name(&self, name: &str) -> Self {
        Self::new(name, self.sort)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constant {
    Bool(bool),
    BitVec { value: BigUint, width: u32 },
}

impl Constant {
    /// Bit-vector constant, truncated to `width` bits.
    pub fn bv(value: impl Into<BigUint>, width: u32) -> Self {
        let mask = (BigUint::one() << width) - BigUint::one();
        Constant::BitVec {
            value: value.into() & mask,
            width,
        }
    }

    pub fn sort(&self) -> Sort {
        match self {
            Constant::Bool(_) => Sort::Bool,
            Constant::BitVec { width, .. } => Sort::BitVec(*width),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constant::Bool(b) => Some(*b),
            Constant::BitVec { .. } => None,
        }
    }

    pub fn as_bv(&self) -> Option<(&BigUint, u32)> {
        match self {
            Constant::Bool(_) => None,
            Constant::BitVec { value, width } => Some((value, *width)),
        }
    }

    pub fn bit(&self, i: u32) -> bool {
        match self {
            Constant::Bool(b) => *b,
            Constant::BitVec { value, .. } => value.bit(i as u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    Not,
    And,
    Or,
    Implies,
    Xor,
    Ite,
    Eq,
    BvAdd,
    BvSub,
    BvMul,
    BvNeg,
    BvAnd,
    BvOr,
    BvXor,
    BvNot,
    BvUlt,
    BvUle,
    BvSlt,
    BvSle,
    /// Uninterpreted function application with the given result sort.
    Call { name: Rc<str>, sort: Sort },
}

impl Op {
    pub fn is_connective(&self) -> bool {
        matches!(self, Op::Not | Op::And | Op::Or | Op::Implies | Op::Xor)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, Op::BvUlt | Op::BvUle | Op::BvSlt | Op::BvSle)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantifier {
    Forall,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Var(Symbol),
    Const(Constant),
    App(Op, Vec<Formula>),
    Quant(Quantifier, Vec<Symbol>, Formula),
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Formula(Rc<Node>);

impl Debug for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<Symbol> for Formula {
    fn from(symbol: Symbol) -> Self {
        Formula::var(symbol)
    }
}

impl From<&Symbol> for Formula {
    fn from(symbol: &Symbol) -> Self {
        Formula::var(symbol.clone())
    }
}

impl Formula {
    fn mk(node: Node) -> Self {
        Formula(Rc::new(node))
    }

    pub fn node(&self) -> &Node {
        &self.0
    }

    pub fn var(symbol: Symbol) -> Self {
        Self::mk(Node::Var(symbol))
    }

    pub fn constant(c: Constant) -> Self {
        Self::mk(Node::Const(c))
    }

    pub fn tt() -> Self {
        Self::constant(Constant::Bool(true))
    }

    pub fn ff() -> Self {
        Self::constant(Constant::Bool(false))
    }

    pub fn bool(b: bool) -> Self {
        Self::constant(Constant::Bool(b))
    }

    pub fn bv(value: u64, width: u32) -> Self {
        Self::constant(Constant::bv(value, width))
    }

    pub fn bv_big(value: BigUint, width: u32) -> Self {
        Self::constant(Constant::bv(value, width))
    }

    pub fn sort(&self) -> Sort {
        match self.node() {
            Node::Var(s) => s.sort(),
            Node::Const(c) => c.sort(),
            Node::Quant(..) => Sort::Bool,
            Node::App(op, args) => match op {
                Op::Call { sort, .. } => *sort,
                Op::Ite => args.get(1).map_or(Sort::Bool, |a| a.sort()),
                Op::BvAdd | Op::BvSub | Op::BvMul | Op::BvNeg | Op::BvAnd | Op::BvOr | Op::BvXor | Op::BvNot => {
                    args.first().map_or(Sort::Bool, |a| a.sort())
                }
                _ => Sort::Bool,
            },
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self.node(), Node::Const(Constant::Bool(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self.node(), Node::Const(Constant::Bool(false)))
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self.node() {
            Node::Var(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self.node() {
            Node::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_app(&self) -> Option<(&Op, &[Formula])> {
        match self.node() {
            Node::App(op, args) => Some((op, args.as_slice())),
            _ => None,
        }
    }

    /// Name, result sort and arguments of an uninterpreted call.
    pub fn as_call(&self) -> Option<(&str, Sort, &[Formula])> {
        match self.node() {
            Node::App(Op::Call { name, sort }, args) => Some((name.as_ref(), *sort, args.as_slice())),
            _ => None,
        }
    }

    /// Top-level conjuncts; a non-conjunction is its own single conjunct.
    pub fn conjuncts(&self) -> Vec<Formula> {
        match self.node() {
            Node::App(Op::And, args) => args.clone(),
            _ if self.is_true() => Vec::new(),
            _ => vec![self.clone()],
        }
    }

    /// Rebuilds an application, applying the simplifying constructors.
    pub fn app(op: Op, args: Vec<Formula>) -> Self {
        match op {
            Op::Not if args.len() == 1 => Self::not(args[0].clone()),
            Op::And => Self::and(args),
            Op::Or => Self::or(args),
            Op::Implies if args.len() == 2 => Self::implies(args[0].clone(), args[1].clone()),
            Op::Ite if args.len() == 3 => Self::ite(args[0].clone(), args[1].clone(), args[2].clone()),
            Op::Eq if args.len() == 2 => Self::eq(args[0].clone(), args[1].clone()),
            op => Self::mk(Node::App(op, args)),
        }
    }

    pub fn not(f: Formula) -> Self {
        match f.node() {
            Node::Const(Constant::Bool(b)) => Self::bool(!b),
            Node::App(Op::Not, args) if args.len() == 1 => args[0].clone(),
            _ => Self::mk(Node::App(Op::Not, vec![f])),
        }
    }

    pub fn and(args: impl IntoIterator<Item = Formula>) -> Self {
        let mut flat: Vec<Formula> = Vec::new();
        for arg in args {
            if arg.is_false() {
                return Self::ff();
            }
            if arg.is_true() {
                continue;
            }
            let parts = match arg.node() {
                Node::App(Op::And, inner) => inner.clone(),
                _ => vec![arg],
            };
            for part in parts {
                if !flat.contains(&part) {
                    flat.push(part);
                }
            }
        }
        match flat.len() {
            0 => Self::tt(),
            1 => flat.remove(0),
            _ => Self::mk(Node::App(Op::And, flat)),
        }
    }

    pub fn or(args: impl IntoIterator<Item = Formula>) -> Self {
        let mut flat: Vec<Formula> = Vec::new();
        for arg in args {
            if arg.is_true() {
                return Self::tt();
            }
            if arg.is_false() {
                continue;
            }
            let parts = match arg.node() {
                Node::App(Op::Or, inner) => inner.clone(),
                _ => vec![arg],
            };
            for part in parts {
                if !flat.contains(&part) {
                    flat.push(part);
                }
            }
        }
        match flat.len() {
            0 => Self::ff(),
            1 => flat.remove(0),
            _ => Self::mk(Node::App(Op::Or, flat)),
        }
    }

    pub fn implies(a: Formula, b: Formula) -> Self {
        if a.is_true() {
            b
        } else if a.is_false() || b.is_true() {
            Self::tt()
        } else if b.is_false() {
            Self::not(a)
        } else {
            Self::mk(Node::App(Op::Implies, vec![a, b]))
        }
    }

    pub fn xor(a: Formula, b: Formula) -> Self {
        Self::mk(Node::App(Op::Xor, vec![a, b]))
    }

    pub fn ite(c: Formula, t: Formula, e: Formula) -> Self {
        if c.is_true() {
            t
        } else if c.is_false() {
            e
        } else if t == e {
            t
        } else {
            Self::mk(Node::App(Op::Ite, vec![c, t, e]))
        }
    }

    pub fn eq(a: Formula, b: Formula) -> Self {
        if a == b {
            return Self::tt();
        }
        if let (Node::Const(x), Node::Const(y)) = (a.node(), b.node()) {
            return Self::bool(x == y);
        }
        Self::mk(Node::App(Op::Eq, vec![a, b]))
    }

    fn binary(op: Op, a: Formula, b: Formula) -> Self {
        Self::mk(Node::App(op, vec![a, b]))
    }

    pub fn bvadd(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvAdd, a, b)
    }
    pub fn bvsub(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvSub, a, b)
    }
    pub fn bvmul(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvMul, a, b)
    }
    pub fn bvneg(a: Formula) -> Self {
        Self::mk(Node::App(Op::BvNeg, vec![a]))
    }
    pub fn bvand(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvAnd, a, b)
    }
    pub fn bvor(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvOr, a, b)
    }
    pub fn bvxor(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvXor, a, b)
    }
    pub fn bvnot(a: Formula) -> Self {
        Self::mk(Node::App(Op::BvNot, vec![a]))
    }
    pub fn ult(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvUlt, a, b)
    }
    pub fn ule(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvUle, a, b)
    }
    pub fn ugt(a: Formula, b: Formula) -> Self {
        Self::ult(b, a)
    }
    pub fn uge(a: Formula, b: Formula) -> Self {
        Self::ule(b, a)
    }
    pub fn slt(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvSlt, a, b)
    }
    pub fn sle(a: Formula, b: Formula) -> Self {
        Self::binary(Op::BvSle, a, b)
    }
    pub fn sgt(a: Formula, b: Formula) -> Self {
        Self::slt(b, a)
    }
    pub fn sge(a: Formula, b: Formula) -> Self {
        Self::sle(b, a)
    }

    pub fn call(name: &str, sort: Sort, args: Vec<Formula>) -> Self {
        Self::mk(Node::App(
            Op::Call {
                name: Rc::from(name),
                sort,
            },
            args,
        ))
    }

    pub fn quant(q: Quantifier, vars: Vec<Symbol>, body: Formula) -> Self {
        if vars.is_empty() || body.as_constant().is_some() {
            return body;
        }
        Self::mk(Node::Quant(q, vars, body))
    }

    pub fn forall(vars: Vec<Symbol>, body: Formula) -> Self {
        Self::quant(Quantifier::Forall, vars, body)
    }

    pub fn exists(vars: Vec<Symbol>, body: Formula) -> Self {
        Self::quant(Quantifier::Exists, vars, body)
    }
}

/// All-ones value of the given width.
pub fn bv_mask(width: u32) -> BigUint {
    if width == 0 {
        return BigUint::zero();
    }
    (BigUint::one() << width) - BigUint::one()
}
