//! Where new predicates go, and where exploration restarts.

use crate::arg::{ArgId, PathElement};
use crate::cfa::Cfa;
use crate::config::RefinementScope;
use crate::predicates::{AbstractionPredicate, PredicatePrecision};

#[derive(Debug, Clone)]
pub struct PrecisionUpdate {
    pub predicates: PredicatePrecision,
    /// Positions (into the abstraction points) whose precision grew.
    pub changed: Vec<usize>,
}

impl PrecisionUpdate {
    pub fn is_progress(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Adds `predicates[k]` for the abstraction point `points[k]` under `scope`.
pub fn update_precision(
    cfa: &Cfa,
    base: &PredicatePrecision,
    path: &[PathElement],
    points: &[usize],
    predicates: &[Vec<AbstractionPredicate>],
    scope: RefinementScope,
) -> PrecisionUpdate {
    let mut result = base.clone();
    let mut changed = Vec::new();
    for (k, preds) in predicates.iter().enumerate() {
        if preds.is_empty() {
            continue;
        }
        let element = &path[points[k]];
        let node = element.location;
        let preds = preds.iter().cloned();
        let grew = match scope {
            RefinementScope::Global => result.add_global(preds),
            RefinementScope::Function => result.add_function(cfa.function_of(node), preds),
            RefinementScope::Location => result.add_location(node, preds),
            RefinementScope::LocationInstance => result.add_location_instance(node, element.instance(), preds),
        };
        if grew {
            changed.push(k);
        }
    }
    PrecisionUpdate {
        predicates: result,
        changed,
    }
}

/// The graph state to re-explore from when the precision at `points[first]`
/// changed: the nearest abstraction state before it.
pub fn restart_point(path: &[PathElement], points: &[usize], first: usize) -> ArgId {
    let end = points.get(first).copied().unwrap_or(path.len());
    path[..end]
        .iter()
        .rev()
        .find(|e| e.is_abstraction())
        .or_else(|| path.first())
        .map_or(0, |e| e.outer)
}
