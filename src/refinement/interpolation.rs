//! Feasibility check and interpolation over block formulas.

use log::trace;

use crate::error::{CpaResult, SolverError};
use crate::formula::Formula;
use crate::solver::{Model, Solver};

#[derive(Debug, Clone)]
pub enum Feasibility {
    Feasible(Model),
    /// One interpolant per block boundary.
    Spurious(Vec<Formula>),
}

pub fn check_path(solver: &dyn Solver, blocks: &[Formula]) -> CpaResult<Feasibility> {
    let conjunction = Formula::and(blocks.iter().cloned());
    if let Some(model) = solver.model(&conjunction)? {
        return Ok(Feasibility::Feasible(model));
    }
    let interpolants = solver
        .interpolate(blocks)?
        .ok_or_else(|| SolverError::Internal("no interpolants for an unsatisfiable path".to_string()))?;
    for (i, itp) in interpolants.iter().enumerate() {
        trace!("Interpolant {}: {}", i, itp);
    }
    Ok(Feasibility::Spurious(interpolants))
}
