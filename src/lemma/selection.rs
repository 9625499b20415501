//! Selection: definitions of active lemmas as additional facts.

use std::collections::BTreeSet;

use log::trace;

use super::{LemmaPrecision, LemmaSet};
use crate::formula::Formula;

/// Facts `call = body[formals := args]` for every active call in `f`.
///
/// Calls introduced by the facts themselves are unfolded up to `depth`
/// further levels. The original call terms stay in place.
pub fn select_facts(f: &Formula, lemmas: &LemmaSet, active: &LemmaPrecision, depth: usize) -> Vec<Formula> {
    let mut facts = Vec::new();
    let mut seen = BTreeSet::new();
    let mut frontier = f.calls();
    for level in 0..=depth {
        let mut next = Vec::new();
        for call in frontier {
            if !seen.insert(call.clone()) {
                continue;
            }
            let Some((name, _, args)) = call.as_call() else {
                continue;
            };
            if !active.is_active(name) {
                continue;
            }
            let Some(body) = lemmas.get(name).and_then(|l| l.instantiate(args)) else {
                continue;
            };
            trace!("Lemma fact at level {} for {}", level, call);
            next.extend(body.calls());
            facts.push(Formula::eq(call.clone(), body));
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    facts
}
