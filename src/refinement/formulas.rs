//! Block formulas of a counterexample path.

use crate::arg::PathElement;
use crate::config::BlockFormulaStrategy;
use crate::cpa::PredicateCpa;
use crate::error::CpaResult;
use crate::formula::Formula;
use crate::lemma::LemmaPrecision;
use crate::pathformula::PathFormulaManager;

/// Indices of the elements that end a block: every abstraction state after
/// the first element, and the last element.
pub fn abstraction_points(path: &[PathElement]) -> Vec<usize> {
    let mut points: Vec<usize> = (1..path.len()).filter(|&i| path[i].is_abstraction()).collect();
    let last = path.len().saturating_sub(1);
    if points.last() != Some(&last) {
        points.push(last);
    }
    points
}

/// One formula per abstraction point, over consecutive SSA versions.
pub fn block_formulas(
    cpa: &PredicateCpa,
    path: &[PathElement],
    points: &[usize],
    lemmas: &LemmaPrecision,
) -> CpaResult<Vec<Formula>> {
    match cpa.config.block_formulas {
        BlockFormulaStrategy::Stored => Ok(stored(path, points)),
        BlockFormulaStrategy::Recompute => recompute(cpa, path, points, lemmas),
    }
}

fn stored(path: &[PathElement], points: &[usize]) -> Vec<Formula> {
    points
        .iter()
        .map(|&i| {
            let state = &path[i].state;
            if state.is_abstraction() {
                state.abstraction_formula().block_formula().formula().clone()
            } else {
                state.path_formula().formula().clone()
            }
        })
        .collect()
}

fn recompute(
    cpa: &PredicateCpa,
    path: &[PathElement],
    points: &[usize],
    lemmas: &LemmaPrecision,
) -> CpaResult<Vec<Formula>> {
    let mut out = Vec::with_capacity(points.len());
    let mut pf = cpa.fmgr.empty();
    let mut next = points.iter().peekable();
    for (i, element) in path.iter().enumerate().skip(1) {
        if let Some(edge) = element.edge {
            pf = cpa.fmgr.make_and_edge(&pf, cpa.cfa.edge(edge), lemmas)?;
        }
        if next.peek() == Some(&&i) {
            next.next();
            out.push(pf.formula().clone());
            pf = cpa.fmgr.empty_with(pf.ssa().clone());
        }
    }
    Ok(out)
}
