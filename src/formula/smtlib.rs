//! SMT-LIB rendering.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use super::{Constant, Formula, Node, Op, Quantifier, Sort, Symbol};

impl Display for Sort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::BitVec(w) => write!(f, "(_ BitVec {})", w),
        }
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if needs_quoting(self.name()) {
            write!(f, "|{}|", self.name())
        } else {
            write!(f, "{}", self.name())
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::BitVec { value, width } => write!(f, "(_ bv{} {})", value, width),
        }
    }
}

impl Op {
    pub fn smt_name(&self) -> &str {
        match self {
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Implies => "=>",
            Op::Xor => "xor",
            Op::Ite => "ite",
            Op::Eq => "=",
            Op::BvAdd => "bvadd",
            Op::BvSub => "bvsub",
            Op::BvMul => "bvmul",
            Op::BvNeg => "bvneg",
            Op::BvAnd => "bvand",
            Op::BvOr => "bvor",
            Op::BvXor => "bvxor",
            Op::BvNot => "bvnot",
            Op::BvUlt => "bvult",
            Op::BvUle => "bvule",
            Op::BvSlt => "bvslt",
            Op::BvSle => "bvsle",
            Op::Call { name, .. } => name.as_ref(),
        }
    }
}

impl Display for Quantifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Quantifier::Forall => write!(f, "forall"),
            Quantifier::Exists => write!(f, "exists"),
        }
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.node() {
            Node::Var(s) => write!(f, "{}", s),
            Node::Const(c) => write!(f, "{}", c),
            Node::App(op, args) => {
                if args.is_empty() {
                    return write!(f, "{}", op.smt_name());
                }
                write!(f, "({}", op.smt_name())?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
            Node::Quant(q, vars, body) => {
                write!(f, "({} (", q)?;
                for (i, v) in vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "({} {})", v, v.sort())?;
                }
                write!(f, ") {})", body)
            }
        }
    }
}

fn needs_quoting(name: &str) -> bool {
    name.is_empty()
        || name.starts_with(|c: char| c.is_ascii_digit())
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c))
}

/// `declare-fun` lines for every free variable and uninterpreted function.
pub fn declarations<'a>(formulas: impl IntoIterator<Item = &'a Formula>) -> Vec<String> {
    let mut symbols = BTreeMap::new();
    let mut functions: BTreeMap<String, (Vec<Sort>, Sort)> = BTreeMap::new();
    for formula in formulas {
        for s in formula.free_symbols() {
            symbols.insert(s.name().to_string(), s);
        }
        for call in formula.calls() {
            if let Some((name, sort, args)) = call.as_call() {
                functions
                    .entry(name.to_string())
                    .or_insert_with(|| (args.iter().map(|a| a.sort()).collect(), sort));
            }
        }
    }
    let mut lines = Vec::new();
    for s in symbols.values() {
        lines.push(format!("(declare-fun {} () {})", s, s.sort()));
    }
    for (name, (args, sort)) in functions {
        let args = args.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" ");
        lines.push(format!("(declare-fun {} ({}) {})", name, args, sort));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let x = Formula::var(Symbol::bv("x", 8));
        let f = Formula::and([
            Formula::eq(x.clone(), Formula::bv(1, 8)),
            Formula::not(Formula::ult(x, Formula::bv(3, 8))),
        ]);
        assert_eq!(f.to_string(), "(and (= x (_ bv1 8)) (not (bvult x (_ bv3 8))))");
    }

    #[test]
    fn test_render_quantifier_and_call() {
        let n = Symbol::bv("n", 8);
        let body = Formula::eq(
            Formula::call("sum", Sort::BitVec(8), vec![Formula::var(n.clone())]),
            Formula::var(n.clone()),
        );
        let f = Formula::forall(vec![n], body);
        assert_eq!(f.to_string(), "(forall ((n (_ BitVec 8))) (= (sum n) n))");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(Symbol::bool("x@2").to_string(), "x@2");
        assert_eq!(Symbol::bool("a b").to_string(), "|a b|");
    }

    #[test]
    fn test_declarations() {
        let x = Formula::var(Symbol::bv("x", 8));
        let f = Formula::eq(Formula::call("f", Sort::BitVec(8), vec![x.clone()]), x);
        assert_eq!(
            declarations([&f]),
            vec![
                "(declare-fun x () (_ BitVec 8))".to_string(),
                "(declare-fun f ((_ BitVec 8)) (_ BitVec 8))".to_string(),
            ]
        );
    }
}
