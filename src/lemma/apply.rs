//! Recursive application: active call sites replaced by lemma bodies.

use super::{LemmaPrecision, LemmaSet};
use crate::formula::{Formula, Node};

/// Inlines every active call in `f`, unfolding at most `depth` nested levels.
///
/// Calls left at the depth bound stay uninterpreted. Substitution only
/// replaces formals and whole call terms; bound variables of lemma bodies
/// are renamed when an argument would be captured.
pub fn apply_lemmas(f: &Formula, lemmas: &LemmaSet, active: &LemmaPrecision, depth: usize) -> Formula {
    if active.is_empty() {
        return f.clone();
    }
    inline(f, lemmas, active, depth)
}

fn inline(f: &Formula, lemmas: &LemmaSet, active: &LemmaPrecision, depth: usize) -> Formula {
    match f.node() {
        Node::Var(_) | Node::Const(_) => f.clone(),
        Node::Quant(q, vars, body) => Formula::quant(*q, vars.clone(), inline(body, lemmas, active, depth)),
        Node::App(op, args) => {
            let args: Vec<Formula> = args.iter().map(|a| inline(a, lemmas, active, depth)).collect();
            let call = Formula::app(op.clone(), args);
            let Some((name, _, call_args)) = call.as_call() else {
                return call;
            };
            if depth == 0 || !active.is_active(name) {
                return call;
            }
            match lemmas.get(name).and_then(|l| l.instantiate(call_args)) {
                Some(body) => inline(&body, lemmas, active, depth - 1),
                None => call,
            }
        }
    }
}
