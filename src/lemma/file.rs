//! Lemma files.
//!
//! ```text
//! (declare-fun limit () (_ BitVec 8))
//! (lemma even (forall ((n (_ BitVec 8)))
//!   (= (even n) (ite (= n #x00) true (not (even (bvsub n #x01)))))))
//! ```
//!
//! A lemma whose identifier is not declared is a relation: its argument
//! sorts come from the binders (or declared symbols) of its defining call.

use log::info;

use super::extract::extract_definition;
use super::{Lemma, LemmaSet};
use crate::error::{CpaError, CpaResult};
use crate::formula::parser::{parse_sexps, parse_sort, Declarations, SExpr};
use crate::formula::smtlib::declarations;
use crate::formula::{Sort, Symbol};

pub fn parse_lemma_file(input: &str) -> CpaResult<LemmaSet> {
    let mut decls = Declarations::new();
    let mut set = LemmaSet::new();
    for sexp in parse_sexps(input)? {
        if decls.try_declare(&sexp)? {
            continue;
        }
        let lemma = parse_entry(&sexp, &mut decls)?;
        set.insert(lemma)?;
    }
    info!("Loaded {} lemmas", set.len());
    Ok(set)
}

fn invalid(entry: &SExpr, reason: &str) -> CpaError {
    CpaError::config(format!("invalid lemma entry {}: {}", entry, reason))
}

fn parse_entry(entry: &SExpr, decls: &mut Declarations) -> CpaResult<Lemma> {
    let items = entry.as_list().ok_or_else(|| invalid(entry, "expected a list"))?;
    if items.len() != 3 || !items[0].is_symbol("lemma") {
        return Err(invalid(entry, "expected (lemma <id> <definition>)"));
    }
    let id = items[1]
        .as_symbol()
        .ok_or_else(|| invalid(entry, "identifier must be a symbol"))?;
    if decls.function(id).is_none() {
        let (args, sort) = signature(&items[2], id, decls).ok_or_else(|| invalid(entry, "cannot infer the signature"))?;
        decls.declare_function(id, args, sort);
    }
    let definition = decls.parse_formula(&items[2])?;
    let lemma = extract_definition(&definition)
        .ok_or_else(|| invalid(entry, "expected (= (<id> <formals>) <body>) with distinct variable formals"))?;
    if lemma.id() != id {
        return Err(invalid(entry, &format!("defines `{}` instead of `{}`", lemma.id(), id)));
    }
    Ok(lemma)
}

/// Argument and result sorts of the defining call `(id x1 .. xn)`.
///
/// Argument sorts come from the binders or declared symbols. The result sort
/// is the sort of the other side of the equality, which may itself call `id`.
fn signature(definition: &SExpr, id: &str, decls: &Declarations) -> Option<(Vec<Sort>, Sort)> {
    let items = definition.as_list()?;
    let (binders, eq) = if items.first()?.is_symbol("forall") && items.len() == 3 {
        let mut binders = Vec::new();
        for binder in items[1].as_list()? {
            let pair = binder.as_list()?;
            if pair.len() != 2 {
                return None;
            }
            binders.push(Symbol::new(pair[0].as_symbol()?, parse_sort(&pair[1]).ok()?));
        }
        (binders, items[2].as_list()?)
    } else {
        (Vec::new(), items)
    };
    if eq.len() != 3 || !eq[0].is_symbol("=") {
        return None;
    }
    let is_head = |side: &SExpr| {
        side.as_list()
            .is_some_and(|call| call.first().is_some_and(|h| h.is_symbol(id)))
    };
    let (head, body) = if is_head(&eq[1]) {
        (eq[1].as_list()?, &eq[2])
    } else if is_head(&eq[2]) {
        (eq[2].as_list()?, &eq[1])
    } else {
        return None;
    };

    let mut scope = decls.clone();
    for binder in &binders {
        scope.declare_symbol(binder);
    }
    let args = head[1..]
        .iter()
        .map(|arg| scope.parse_formula(arg).ok().map(|f| f.sort()))
        .collect::<Option<Vec<_>>>()?;

    // A recursive body only parses once `id` has its real result sort.
    let mut candidates = vec![Sort::Bool];
    for binder in &binders {
        if !candidates.contains(&binder.sort()) {
            candidates.push(binder.sort());
        }
    }
    let mut i = 0;
    while i < candidates.len() {
        let sort = candidates[i];
        scope.declare_function(id, args.clone(), sort);
        match scope.parse_formula(body) {
            Ok(f) if f.sort() == sort => return Some((args, sort)),
            Ok(f) if !candidates.contains(&f.sort()) => candidates.push(f.sort()),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Renders `set` in the format read by [`parse_lemma_file`].
pub fn write_lemma_file(set: &LemmaSet) -> String {
    let definitions: Vec<_> = set.iter().map(|l| l.definition()).collect();
    let mut out = String::new();
    for line in declarations(&definitions) {
        out.push_str(&line);
        out.push('\n');
    }
    for (lemma, definition) in set.iter().zip(&definitions) {
        out.push_str(&format!("(lemma {} {})\n", lemma.id(), definition));
    }
    out
}
