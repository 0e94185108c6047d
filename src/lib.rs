//! Quality Cycle — autonomous AI quality-monitoring and optimization
//! orchestrator for a multi-provider LLM serving layer.
//!
//! Exposes every component (C1-C8) for use by the `quality-cycle` binary
//! and by integration tests. See `SPEC_FULL.md` for the component map.

pub mod alerts;
pub mod api;
pub mod config;
pub mod deploy;
pub mod error;
pub mod learning;
pub mod middleware;
pub mod models;
pub mod monitor;
pub mod optimize;
pub mod orchestrator;
pub mod scoring;
pub mod trace_client;

pub use orchestrator::AppState;
