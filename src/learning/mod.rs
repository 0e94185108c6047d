//! C5 — Learning Store: persistent labeled-pattern memory with
//! Laplace-smoothed confidence and linear-scan similarity search.

mod store;

pub use store::{feature_fingerprint, LearningStore};
