//! Error types for ssl_local_planner
//!
//! Only configuration and loading errors ever reach a caller as `Err`.
//! Per-tick planning failures are carried as values and recovered inside the
//! tick by the facade.

use thiserror::Error;

/// Main error type for the local planning layer
#[derive(Debug, Error)]
pub enum PlanningError {
    /// Invalid configuration value, raised at construction time
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// Every sampled DWA motion was infeasible
    #[error("No viable candidate motion")]
    NoViableCandidate,
    /// The horizon QP did not produce an acceptable solution
    #[error("Solver failure: {0}")]
    Solver(#[from] SolverFailure),
    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// I/O error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reason a QP solve was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverFailure {
    /// Solver terminated with a non-optimal status
    #[error("solver reported {status}")]
    Infeasible { status: String },
    /// Solver hit its deadline before converging
    #[error("solver deadline of {limit_s:.4} s exceeded")]
    Timeout { limit_s: f64 },
    /// Problem could not be handed to the solver
    #[error("solver setup failed: {0}")]
    Backend(String),
}

/// Result type alias for planning operations
pub type PlanningResult<T> = Result<T, PlanningError>;
