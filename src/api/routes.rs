//! Public HTTP control surface for the virtuous cycle (spec §6): status,
//! manual trigger, rollback, and audit-history pruning. Handlers stay
//! thin — all decisions live in C3/C6/C7; routes only translate.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::error::DeploymentError;
use crate::models::{Alert, ConfigDelta, DeploymentRecord, Spectrum};
use crate::monitor::WindowSnapshot;
use crate::orchestrator::{AppState, TaskName};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/virtuous-cycle/status", get(status))
        .route("/v1/virtuous-cycle/trigger", post(trigger))
        .route("/v1/virtuous-cycle/rollback", post(rollback))
        .route("/v1/virtuous-cycle/clear-history", post(clear_history))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct TaskHealthView {
    state: &'static str,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    aggregates: Vec<WindowSnapshot>,
    active_alerts: Vec<Alert>,
    recent_deployments: Vec<DeploymentRecord>,
    task_health: HashMap<&'static str, TaskHealthView>,
    recent_config_deltas: Vec<ConfigDelta>,
}

const RECENT_DEPLOYMENTS: usize = 20;
const RECENT_DELTAS: usize = 20;

/// `GET /v1/virtuous-cycle/status` — always 200 (spec §7): current
/// aggregates, active alerts, recent deployments with task health and
/// the last N ConfigDeltas.
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let recent_deployments = state.deployer.recent_deployments(RECENT_DEPLOYMENTS);

    let recent_config_deltas = recent_deployments
        .iter()
        .flat_map(|r| r.changes.iter().cloned())
        .rev()
        .take(RECENT_DELTAS)
        .collect();

    let mut task_health = HashMap::new();
    for (name, health) in state.task_health_snapshot() {
        task_health.insert(
            name.as_str(),
            TaskHealthView {
                state: health.as_label(),
                reason: health.reason().map(str::to_string),
            },
        );
    }
    for name in [TaskName::Poller, TaskName::Scorer, TaskName::Monitor, TaskName::Coordinator] {
        task_health.entry(name.as_str()).or_insert(TaskHealthView {
            state: "running",
            reason: None,
        });
    }

    Json(StatusResponse {
        aggregates: state.monitor.snapshot(),
        active_alerts: state.alerts.active_alerts(),
        recent_deployments,
        task_health,
        recent_config_deltas,
    })
}

#[derive(Debug, Default, Deserialize)]
struct TriggerRequest {
    model: Option<String>,
    spectrum: Option<String>,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    cycle_id: String,
    model: String,
    spectrum: String,
}

/// `POST /v1/virtuous-cycle/trigger` — manual optimization trigger (spec
/// §6, §4.6 "manual trigger arrives via the control API"). Without an
/// explicit target, picks the worst-performing tracked (model, spectrum)
/// pair by mean quality, since that is the one most in need of a cycle.
/// Returns 202 with the cycle id (spec §7: "Trigger endpoint returns 202
/// with a cycle id").
async fn trigger(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TriggerRequest>>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();

    let (model, spectrum) = match (req.model, req.spectrum) {
        (Some(model), Some(spectrum_tag)) => {
            let spectrum = Spectrum::parse(&spectrum_tag)
                .ok_or_else(|| ApiError::BadRequest("unknown_spectrum", format!("unknown spectrum tag: {spectrum_tag}")))?;
            (model, spectrum)
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(ApiError::BadRequest(
                "incomplete_target",
                "both model and spectrum are required when targeting a specific pair".into(),
            ));
        }
        (None, None) => pick_worst_tracked(&state)
            .ok_or_else(|| ApiError::BadRequest("no_tracked_pairs", "no (model, spectrum) pair is being monitored yet".into()))?,
    };

    let cycle_id = state.engine.trigger(model.clone(), spectrum, crate::optimize::TriggerReason::Manual);
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            cycle_id,
            model,
            spectrum: spectrum.as_str().to_string(),
        }),
    ))
}

fn pick_worst_tracked(state: &Arc<AppState>) -> Option<(String, Spectrum)> {
    state
        .monitor
        .snapshot()
        .into_iter()
        .filter_map(|snap| Spectrum::parse(&snap.spectrum).map(|sp| (snap.model, sp, snap.stats.mean)))
        .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(model, spectrum, _)| (model, spectrum))
}

#[derive(Debug, Default, Deserialize)]
struct RollbackRequest {
    record_id: Option<String>,
}

/// `POST /v1/virtuous-cycle/rollback` — rollback to a prior deployment
/// (spec §6, §4.7). 200 with the new `rolled_back` record, or 409 if no
/// eligible record exists.
async fn rollback(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RollbackRequest>>,
) -> Result<Json<DeploymentRecord>, ApiError> {
    let record_id = body.and_then(|Json(b)| b.record_id);
    match state.deployer.rollback(record_id).await {
        Ok(record) => Ok(Json(record)),
        Err(DeploymentError::NoEligibleRecord) => {
            Err(ApiError::Conflict("no_eligible_record", "no eligible deployment to roll back".into()))
        }
        Err(e) => Err(ApiError::Internal("rollback_failed", e.to_string())),
    }
}

#[derive(Debug, Serialize)]
struct ClearHistoryResponse {
    deployments_retained: usize,
}

/// `POST /v1/virtuous-cycle/clear-history` — prunes the deployment audit
/// log beyond retention and drops resolved low-severity alerts (spec §6).
async fn clear_history(State(state): State<Arc<AppState>>) -> Result<Json<ClearHistoryResponse>, ApiError> {
    let retained = state
        .deployer
        .clear_history()
        .map_err(|e| ApiError::Internal("clear_history_failed", e.to_string()))?;
    state.alerts.clear_resolved();
    Ok(Json(ClearHistoryResponse {
        deployments_retained: retained,
    }))
}
