//! Error taxonomy
//!
//! - [`ConfigurationError`]: fatal to the call that detected it (construction
//!   or a malformed solve request), never silently corrected
//! - [`OptimizationFailure`]: the backend did not produce an acceptable
//!   solution; the controller keeps its previous warm start
//! - [`MpcError`]: what a solve call returns

use std::path::PathBuf;

use thiserror::Error;

use quadnmpc_core::dynamics::ModelError;

/// Invalid configuration or malformed input
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown dynamics model '{0}'")]
    UnknownModel(String),
    #[error("{what} has length {got}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid horizon: {0}")]
    InvalidHorizon(String),
    #[error("invalid step size {0}")]
    InvalidStep(f64),
    #[error("invalid control bounds: {0}")]
    InvalidBounds(String),
    #[error("invalid cost weights: {0}")]
    InvalidWeights(String),
    #[error("invalid solver settings: {0}")]
    InvalidSolver(String),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<ModelError> for ConfigurationError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Unknown(name) => ConfigurationError::UnknownModel(name),
            ModelError::InvalidStep(dt) => ConfigurationError::InvalidStep(dt),
            ModelError::InvalidRefinement => {
                ConfigurationError::InvalidSolver("integrator refinement must be at least 1".into())
            }
            ModelError::StateLength { expected, got } => ConfigurationError::LengthMismatch {
                what: "state",
                expected,
                got,
            },
        }
    }
}

/// The NLP backend failed to converge
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizationFailure {
    #[error("no convergence after {iterations} iterations (constraint violation {violation:.3e})")]
    MaxIterations { iterations: usize, violation: f64 },
    #[error("QP subproblem failed at iteration {iteration}: {status}")]
    QpFailure { iteration: usize, status: String },
    #[error("line search failed at iteration {0}")]
    LineSearch(usize),
    #[error("numerical breakdown: {0}")]
    NumericalBreakdown(String),
    #[error("backend setup failed: {0}")]
    Setup(String),
}

/// Error returned by [`NmpcController::solve`](crate::NmpcController::solve)
#[derive(Debug, Error)]
pub enum MpcError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("optimization failed: {0}")]
    Optimization(#[from] OptimizationFailure),
}

impl MpcError {
    /// Whether retrying with the kept warm start makes sense
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MpcError::Optimization(_))
    }
}
