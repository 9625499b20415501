//! Extraction passes over solved or simplified formulas.

use std::collections::{BTreeMap, BTreeSet};

use super::{Lemma, LEMMA_PREFIX};
use crate::formula::{Constant, Formula, Node, Op, Quantifier, Symbol};

/// Boolean guard literal `__lemma.<id>`.
pub fn guard(id: &str) -> Symbol {
    Symbol::bool(&format!("{}{}", LEMMA_PREFIX, id))
}

/// Lemma identifier named by a guard literal.
pub fn guard_id(symbol: &Symbol) -> Option<&str> {
    symbol.name().strip_prefix(LEMMA_PREFIX).filter(|id| !id.is_empty())
}

/// Lemma identifiers referenced through guard literals in `f`.
pub fn referenced_lemmas(f: &Formula) -> BTreeSet<String> {
    f.free_symbols()
        .iter()
        .filter_map(|s| guard_id(s).map(str::to_string))
        .collect()
}

/// Recovers a lemma from `∀ xs. id(xs) = body` or `id(xs) = body`.
///
/// The call arguments must be distinct variables; either side of the
/// equality may hold the call.
pub fn extract_definition(f: &Formula) -> Option<Lemma> {
    let (bound, eq) = match f.node() {
        Node::Quant(Quantifier::Forall, vars, body) => (Some(vars), body),
        _ => (None, f),
    };
    let (Op::Eq, sides) = eq.as_app()? else {
        return None;
    };
    if sides.len() != 2 {
        return None;
    }
    let (head, body) = if sides[0].as_call().is_some() {
        (&sides[0], &sides[1])
    } else {
        (&sides[1], &sides[0])
    };
    let (id, _, args) = head.as_call()?;
    let formals: Vec<Symbol> = args.iter().map(|a| a.as_symbol().cloned()).collect::<Option<_>>()?;
    if let Some(bound) = bound {
        if bound.iter().any(|v| !formals.contains(v)) {
            return None;
        }
    }
    Lemma::new(id, formals, body.clone()).ok()
}

/// Concrete values from a conjunction of `variable = constant` atoms.
///
/// Boolean variables may also appear as plain or negated literals. Returns
/// `None` if any conjunct has another shape; an equality between two
/// variables carries no value and is rejected.
pub fn witness_map(f: &Formula) -> Option<BTreeMap<Symbol, Constant>> {
    let mut map = BTreeMap::new();
    for conjunct in f.conjuncts() {
        let (symbol, value) = match conjunct.node() {
            Node::Var(s) if s.sort().is_bool() => (s.clone(), Constant::Bool(true)),
            Node::App(Op::Not, args) => match args[0].as_symbol() {
                Some(s) if s.sort().is_bool() => (s.clone(), Constant::Bool(false)),
                _ => return None,
            },
            Node::App(Op::Eq, args) if args.len() == 2 => match (args[0].node(), args[1].node()) {
                (Node::Var(s), Node::Const(c)) | (Node::Const(c), Node::Var(s)) => (s.clone(), c.clone()),
                _ => return None,
            },
            _ => return None,
        };
        if map.get(&symbol).is_some_and(|v| *v != value) {
            return None;
        }
        map.insert(symbol, value);
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Sort;
    use crate::lemma::tests::even;

    #[test]
    fn test_definition_roundtrip() {
        let lemma = even();
        let extracted = extract_definition(&lemma.definition()).unwrap();
        assert_eq!(extracted, lemma);

        let flipped = Formula::eq(lemma.body().clone(), lemma.head());
        assert_eq!(extract_definition(&flipped).unwrap().id(), "even");
    }

    #[test]
    fn test_definition_requires_variable_arguments() {
        let call = Formula::call("f", Sort::Bool, vec![Formula::bv(1, 8)]);
        assert!(extract_definition(&Formula::eq(call, Formula::tt())).is_none());
        let x = Formula::var(Symbol::bv("x", 8));
        assert!(extract_definition(&Formula::ult(x, Formula::bv(1, 8))).is_none());
    }

    #[test]
    fn test_referenced_lemmas() {
        let f = Formula::and([
            Formula::var(guard("even")),
            Formula::not(Formula::var(guard("odd"))),
            Formula::var(Symbol::bool("p")),
        ]);
        let ids = referenced_lemmas(&f);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["even", "odd"]);
        assert_eq!(guard_id(&Symbol::bool("__lemma.")), None);
    }

    #[test]
    fn test_witness_map() {
        let x = Symbol::bv("x", 8);
        let p = Symbol::bool("p");
        let f = Formula::and([
            Formula::eq(Formula::var(x.clone()), Formula::bv(7, 8)),
            Formula::not(Formula::var(p.clone())),
        ]);
        let map = witness_map(&f).unwrap();
        assert_eq!(map[&x], Constant::bv(7u32, 8));
        assert_eq!(map[&p], Constant::Bool(false));

        let y = Formula::var(Symbol::bv("y", 8));
        assert!(witness_map(&Formula::eq(Formula::var(x), y)).is_none());
        assert_eq!(witness_map(&Formula::tt()), Some(BTreeMap::new()));
    }
}
