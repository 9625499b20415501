//! Syntactic simplification.

use std::collections::BTreeMap;

use num_traits::Zero;

use super::{bv_mask, Constant, Formula, Node, Op};

/// Bottom-up rewriting with constant folding and a few local identities.
pub fn simplify(f: &Formula) -> Formula {
    match f.node() {
        Node::Var(_) | Node::Const(_) => f.clone(),
        Node::Quant(q, vars, body) => {
            let body = simplify(body);
            let free = body.free_symbols();
            let vars = vars.iter().filter(|v| free.contains(v)).cloned().collect();
            Formula::quant(*q, vars, body)
        }
        Node::App(op, args) => {
            let args: Vec<Formula> = args.iter().map(simplify).collect();
            let folded = !matches!(op, Op::Call { .. }) && args.iter().all(|a| a.as_constant().is_some());
            if folded {
                if let Some(c) = Formula::app(op.clone(), args.clone()).eval(&BTreeMap::new()) {
                    return Formula::constant(c);
                }
            }
            rewrite(op, args)
        }
    }
}

fn is_bv_zero(f: &Formula) -> bool {
    matches!(f.as_constant(), Some(Constant::BitVec { value, .. }) if value.is_zero())
}

fn is_bv_max(f: &Formula) -> bool {
    matches!(f.as_constant(), Some(Constant::BitVec { value, width }) if *value == bv_mask(*width))
}

fn has_complementary(args: &[Formula]) -> bool {
    args.iter().any(|a| args.contains(&Formula::not(a.clone())))
}

fn rewrite(op: &Op, args: Vec<Formula>) -> Formula {
    match op {
        Op::And if has_complementary(&args) => Formula::ff(),
        Op::Or if has_complementary(&args) => Formula::tt(),
        Op::Implies | Op::BvUle if args.len() == 2 && args[0] == args[1] => Formula::tt(),
        Op::Xor | Op::BvUlt | Op::BvSlt if args.len() == 2 && args[0] == args[1] => Formula::ff(),
        Op::BvUle if args.len() == 2 && (is_bv_zero(&args[0]) || is_bv_max(&args[1])) => Formula::tt(),
        Op::BvUlt if args.len() == 2 && is_bv_zero(&args[1]) => Formula::ff(),
        Op::BvAdd | Op::BvSub | Op::BvOr | Op::BvXor if args.len() == 2 && is_bv_zero(&args[1]) => args[0].clone(),
        Op::BvAdd | Op::BvOr | Op::BvXor if args.len() == 2 && is_bv_zero(&args[0]) => args[1].clone(),
        _ => Formula::app(op.clone(), args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Symbol;

    fn x() -> Formula {
        Formula::var(Symbol::bv("x", 8))
    }

    #[test]
    fn test_constant_folding() {
        let f = Formula::eq(Formula::bvadd(Formula::bv(1, 8), Formula::bv(2, 8)), Formula::bv(3, 8));
        assert!(simplify(&f).is_true());
    }

    #[test]
    fn test_identities() {
        let f = Formula::eq(Formula::bvadd(x(), Formula::bv(0, 8)), Formula::bv(3, 8));
        assert_eq!(simplify(&f), Formula::eq(x(), Formula::bv(3, 8)));
        let g = Formula::ule(Formula::bv(0, 8), x());
        assert!(simplify(&g).is_true());
        let a = Formula::ult(x(), Formula::bv(4, 8));
        let h = Formula::and([a.clone(), Formula::not(a)]);
        assert!(simplify(&h).is_false());
    }

    #[test]
    fn test_drops_unused_binders() {
        let y = Symbol::bv("y", 8);
        let f = Formula::exists(vec![y], Formula::ult(x(), Formula::bv(4, 8)));
        assert_eq!(simplify(&f), Formula::ult(x(), Formula::bv(4, 8)));
    }
}
