//! Error types for the deployment orchestrator.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Main error type for the orchestrator.
#[derive(Error, Debug)]
pub enum DeployError {
    // Plan errors (fatal before any side effect)
    #[error("Invalid deployment plan: {reason}")]
    PlanInvalid { reason: String },

    #[error("Plan parse error at {path:?}: {reason}")]
    PlanParseError { path: PathBuf, reason: String },

    #[error("Circular dependency detected involving service: {service}")]
    CycleDetected { service: String },

    #[error(
        "Missing dependency: service '{service}' depends on '{dependency}' which does not exist"
    )]
    MissingDependency { service: String, dependency: String },

    #[error("Service '{service}' is declared more than once")]
    DuplicateService { service: String },

    // Service lifecycle errors
    #[error("Failed to start service {service}: {reason}")]
    StartFailed { service: String, reason: String },

    #[error("Service {service} did not become ready within {timeout_secs}s: {last_error}")]
    ReadinessTimeout { service: String, timeout_secs: u64, last_error: String },

    #[error("Failed to stop service {service}: {reason}")]
    StopFailed { service: String, reason: String },

    #[error("Invalid state transition for {service}: {from} -> {to}")]
    InvalidTransition { service: String, from: String, to: String },

    // Certificate errors
    #[error("Certificate challenge failed: {reason}")]
    ChallengeFailed { reason: String, output: String },

    #[error("Port {port} is already bound by {service}")]
    PortConflict { port: u16, service: String },

    // External collaborators
    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Command `{program}` failed: {reason}")]
    Command { program: String, reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    /// Errors that mean the plan itself is unusable. Nothing has been started
    /// when one of these is returned.
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            Self::PlanInvalid { .. }
                | Self::PlanParseError { .. }
                | Self::CycleDetected { .. }
                | Self::MissingDependency { .. }
                | Self::DuplicateService { .. }
        )
    }
}
