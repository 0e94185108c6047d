//! C7 — Deployment Manager: safe configuration deployment with audit
//! history and rollback.

mod audit;
mod manager;
mod snapshot;

pub use audit::DeploymentAuditLog;
pub use manager::{DeploymentManager, ValidationResult};
pub use snapshot::{content_hash, SnapshotStore};
