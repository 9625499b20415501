//! Error taxonomy of the analysis.
//!
//! Transfer failures are absorbed where an edge is post-processed; every
//! other variant propagates to the run controller, which stops and reports
//! the classified failure.

use thiserror::Error;

/// Failures raised by a [`Solver`][crate::solver::Solver] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("solver call interrupted by shutdown request")]
    Interrupted,

    #[error("unsupported formula: {0}")]
    Unsupported(String),

    #[error("internal solver error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CpaError {
    #[error("cannot encode edge {edge}: {reason}")]
    Transfer { edge: String, reason: String },

    #[error("solver failure: {0}")]
    Solver(#[from] SolverError),

    #[error("refinement made no progress on repeated counterexample: {path}")]
    NonConvergence { path: String },

    #[error("block summary cache inconsistency: {0}")]
    CacheInconsistency(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CpaError {
    pub fn transfer(edge: impl ToString, reason: impl Into<String>) -> Self {
        CpaError::Transfer {
            edge: edge.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        CpaError::Configuration(message.into())
    }

    /// Whether the error may be absorbed locally instead of ending the run.
    pub fn is_local(&self) -> bool {
        matches!(self, CpaError::Transfer { .. })
    }
}

pub type CpaResult<T> = Result<T, CpaError>;
