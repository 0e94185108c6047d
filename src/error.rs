//! Error taxonomy for the quality cycle.
//!
//! Components recover transients locally; structural errors propagate to
//! the orchestrator, which decides to degrade or halt. The HTTP surface
//! never echoes these directly — see `crate::api::error::ApiError`.

use thiserror::Error;

/// Errors surfaced by the trace client (C1).
#[derive(Debug, Error)]
pub enum TraceClientError {
    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl TraceClientError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TraceClientError::Auth(_))
    }
}

/// Errors surfaced by the deployment manager (C7).
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("deployment lock busy")]
    LockBusy,

    #[error("no eligible record for rollback")]
    NoEligibleRecord,

    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors surfaced by the optimization engine (C6).
#[derive(Debug, Error)]
pub enum OptimizationError {
    #[error("cycle timed out")]
    Timeout,

    #[error("cycle aborted: {0}")]
    Aborted(String),

    #[error("transient remote error: {0}")]
    Transient(String),

    #[error(transparent)]
    Trace(#[from] TraceClientError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}

/// Top-level error used where callers don't care about the specific
/// component boundary (orchestrator wiring, bin entry points).
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    TraceClient(#[from] TraceClientError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("shutdown")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
