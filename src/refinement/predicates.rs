//! Predicates from interpolants.

use crate::error::CpaResult;
use crate::formula::ssa::uninstantiate;
use crate::formula::{Formula, Op};
use crate::predicates::{AbstractionPredicate, PredicateManager};
use crate::solver::Solver;

/// Turns an interpolant into predicates over program variables.
///
/// `false` yields the false predicate and `true` yields nothing. Otherwise
/// the interpolant is used whole, or split into its atoms, with bit-vector
/// equalities optionally split into two unsigned bounds.
pub fn extract_predicates(
    solver: &dyn Solver,
    pmgr: &PredicateManager,
    interpolant: &Formula,
    atomize: bool,
    split_equalities: bool,
) -> CpaResult<Vec<AbstractionPredicate>> {
    let mut f = solver.simplify(interpolant)?;
    if f.has_quantifier() {
        f = solver.eliminate_quantifiers(&f)?;
    }
    if f.is_false() {
        return Ok(vec![pmgr.false_predicate()]);
    }
    if f.is_true() {
        return Ok(Vec::new());
    }

    let atoms: Vec<Formula> = if atomize { f.atoms().into_iter().collect() } else { vec![f] };
    let mut out = Vec::new();
    for atom in atoms {
        let parts = match atom.as_app() {
            Some((Op::Eq, [a, b])) if split_equalities && !a.sort().is_bool() => {
                vec![Formula::ule(a.clone(), b.clone()), Formula::ule(b.clone(), a.clone())]
            }
            _ => vec![atom],
        };
        for part in parts {
            let p = pmgr.make_predicate(uninstantiate(&part));
            if !out.contains(&p) {
                out.push(p);
            }
        }
    }
    Ok(out)
}
