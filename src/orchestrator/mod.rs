//! C8 — Orchestrator: owns the four background tasks and the shared
//! state they and the HTTP control surface operate on (spec §4.8).

mod state;
mod tasks;

pub use state::{AppState, TaskHealth, TaskName};
pub use tasks::spawn_all;
