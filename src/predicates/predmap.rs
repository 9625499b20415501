//! Predicate map files.
//!
//! Declarations come first, followed by one section per scope:
//!
//! ```text
//! (declare-fun x () (_ BitVec 8))
//!
//! *:
//! (assert (bvult x (_ bv10 8)))
//!
//! main:
//! (assert (= x (_ bv0 8)))
//!
//! main N3:
//! (assert (= x (_ bv1 8)))
//!
//! main N3@2:
//! (assert (= x (_ bv2 8)))
//! ```

use std::collections::BTreeSet;

use log::info;

use super::{AbstractionPredicate, PredicateManager, PredicatePrecision};
use crate::cfa::{Cfa, NodeId};
use crate::error::{CpaError, CpaResult};
use crate::formula::parser::{parse_sexps, Declarations};
use crate::formula::smtlib::declarations;
use crate::formula::Formula;

enum Section {
    Global,
    Function(String),
    Location(NodeId),
    LocationInstance(NodeId, u32),
}

pub fn write_predicate_map(precision: &PredicatePrecision, cfa: &Cfa) -> String {
    let atoms: Vec<Formula> = precision
        .all_predicates()
        .iter()
        .map(|p| p.atom().clone())
        .collect();
    let mut out = String::new();
    for line in declarations(&atoms) {
        out.push_str(&line);
        out.push('\n');
    }

    let mut section = |header: String, ps: &BTreeSet<AbstractionPredicate>| {
        if ps.is_empty() {
            return;
        }
        out.push('\n');
        out.push_str(&header);
        out.push_str(":\n");
        for p in ps {
            out.push_str(&format!("(assert {})\n", p.atom()));
        }
    };
    section("*".to_string(), precision.global());
    for (f, ps) in precision.functions() {
        section(f.to_string(), ps);
    }
    for (n, ps) in precision.locations() {
        section(format!("{} N{}", cfa.function_of(n), n), ps);
    }
    for (n, k, ps) in precision.location_instances() {
        section(format!("{} N{}@{}", cfa.function_of(n), n, k), ps);
    }
    out
}

fn parse_header(header: &str, cfa: &Cfa) -> CpaResult<Section> {
    let invalid = |reason: &str| CpaError::config(format!("invalid predicate map section `{}`: {}", header, reason));
    if header == "*" {
        return Ok(Section::Global);
    }
    let (function, location) = match header.split_once(' ') {
        Some((f, l)) => (f, Some(l.trim())),
        None => (header, None),
    };
    if cfa.function(function).is_none() {
        return Err(invalid("unknown function"));
    }
    let Some(location) = location else {
        return Ok(Section::Function(function.to_string()));
    };
    let location = location.strip_prefix('N').ok_or_else(|| invalid("expected N<id>"))?;
    let (node, instance) = match location.split_once('@') {
        Some((n, k)) => (n, Some(k)),
        None => (location, None),
    };
    let node: NodeId = node.parse().map_err(|_| invalid("bad node id"))?;
    if node >= cfa.nodes().len() || cfa.function_of(node) != function {
        return Err(invalid("node does not belong to the function"));
    }
    match instance {
        None => Ok(Section::Location(node)),
        Some(k) => {
            let k: u32 = k.parse().map_err(|_| invalid("bad instance number"))?;
            Ok(Section::LocationInstance(node, k))
        }
    }
}

pub fn parse_predicate_map(input: &str, cfa: &Cfa, pmgr: &PredicateManager) -> CpaResult<PredicatePrecision> {
    let mut decls = Declarations::new();
    let mut precision = PredicatePrecision::new();
    let mut section: Option<Section> = None;
    let mut body = String::new();

    let mut flush = |section: &Option<Section>, body: &mut String, decls: &mut Declarations| -> CpaResult<()> {
        for sexp in parse_sexps(body)? {
            if decls.try_declare(&sexp)? {
                continue;
            }
            let items = sexp
                .as_list()
                .filter(|items| items.len() == 2 && items[0].is_symbol("assert"))
                .ok_or_else(|| CpaError::config(format!("expected (assert <formula>), found {}", sexp)))?;
            let atom = decls.parse_formula(&items[1])?;
            if !atom.sort().is_bool() {
                return Err(CpaError::config(format!("predicate {} is not boolean", atom)));
            }
            let p = [pmgr.make_predicate(atom)];
            match section {
                None => return Err(CpaError::config("predicate outside of a section")),
                Some(Section::Global) => precision.add_global(p),
                Some(Section::Function(f)) => precision.add_function(f, p),
                Some(Section::Location(n)) => precision.add_location(*n, p),
                Some(Section::LocationInstance(n, k)) => precision.add_location_instance(*n, *k, p),
            };
        }
        body.clear();
        Ok(())
    };

    for line in input.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with('(') && !trimmed.starts_with(';') {
            if let Some(header) = trimmed.strip_suffix(':') {
                flush(&section, &mut body, &mut decls)?;
                section = Some(parse_header(header.trim(), cfa)?);
                continue;
            }
        }
        body.push_str(line);
        body.push('\n');
    }
    flush(&section, &mut body, &mut decls)?;
    info!("Loaded {} predicates from predicate map", precision.all_predicates().len());
    Ok(precision)
}
