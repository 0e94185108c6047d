//! The four long-running background tasks C8 owns: poller, scorer,
//! monitor, coordinator (spec §4.8).
//!
//! Grounded on the teacher's `main.rs` task-spawning shape (one
//! `tokio::spawn` per independent activity, each holding its own
//! `broadcast::Receiver<()>` for the shared shutdown signal) and
//! `DataSourceKillSwitch`'s halt-on-repeated-failure behavior, adapted
//! from a kill switch tripped by failure counts to one tripped
//! immediately by an unrecoverable `AuthFailure` (spec §7).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{Alert, AlertKind, AlertSubject, Severity, Spectrum, Trace};
use crate::monitor::MonitorEvent;
use crate::optimize::TriggerReason;
use crate::orchestrator::state::{AppState, TaskHealth, TaskName};
use crate::scoring::QualityScorer;

const REORDER_WINDOW: ChronoDuration = ChronoDuration::seconds(30);
const TRACE_CHANNEL_CAPACITY: usize = 4_096;
const EVENT_CHANNEL_CAPACITY: usize = 4_096;

/// Spawns poller, scorer, monitor, and coordinator, wired together with
/// bounded channels (spec §5 "inter-task channel sends and receives" as
/// a suspension point). Returns the join handles so `main` can await
/// them during graceful shutdown.
pub fn spawn_all(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let (trace_tx, trace_rx) = mpsc::channel::<Trace>(TRACE_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<MonitorEvent>(EVENT_CHANNEL_CAPACITY);

    vec![
        tokio::spawn(poller_task(state.clone(), trace_tx, state.shutdown.subscribe())),
        tokio::spawn(scorer_task(state.clone(), trace_rx, event_tx, state.shutdown.subscribe())),
        tokio::spawn(monitor_task(state.clone(), event_rx, state.shutdown.subscribe())),
        tokio::spawn(coordinator_task(state.clone(), state.shutdown.subscribe())),
    ]
}

/// Calls C1 at a fixed cadence, feeding fetched traces into the scorer's
/// channel. An `AuthFailure` halts this task permanently and raises
/// exactly one CRITICAL alert (spec §7, §8 scenario 4); other errors are
/// transient and already retried inside the client, so a propagated one
/// here only degrades this task for one tick.
async fn poller_task(state: Arc<AppState>, trace_tx: mpsc::Sender<Trace>, mut shutdown: broadcast::Receiver<()>) {
    let mut cursors: HashMap<String, String> = HashMap::new();
    let mut interval = tokio::time::interval(state.config.poll_interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(task = TaskName::Poller.as_str(), "shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        match state.trace_client.fetch_recent(&cursors).await {
            Ok(result) => {
                for (project_id, err) in &result.project_errors {
                    debug!(project = %project_id, error = %err, "project poll degraded");
                }
                cursors.extend(result.cursors);
                state.set_task_health(TaskName::Poller, TaskHealth::Running);

                for trace in result.traces {
                    if trace_tx.try_send(trace).is_err() {
                        warn!(task = TaskName::Poller.as_str(), "trace channel saturated, dropping trace");
                        state.alerts.publish(
                            AlertKind::ResourceExhaustion,
                            Severity::Medium,
                            AlertSubject {
                                model: "*".into(),
                                spectrum: "*".into(),
                            },
                            TRACE_CHANNEL_CAPACITY as f64,
                            TRACE_CHANNEL_CAPACITY as f64,
                        );
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                let reason = e.to_string();
                warn!(task = TaskName::Poller.as_str(), error = %reason, "auth failure, halting poller");
                state.set_task_health(TaskName::Poller, TaskHealth::Halted(reason.clone()));
                state.alerts.publish(
                    AlertKind::AuthFailure,
                    Severity::Critical,
                    AlertSubject {
                        model: "*".into(),
                        spectrum: "*".into(),
                    },
                    0.0,
                    0.0,
                );
                return;
            }
            Err(e) => {
                let reason = e.to_string();
                debug!(task = TaskName::Poller.as_str(), error = %reason, "poll cycle failed, continuing");
                state.set_task_health(TaskName::Poller, TaskHealth::Degraded(reason));
            }
        }
    }
}

/// Bounded reorder buffer: traces are admitted in arrival order but
/// flushed in timestamp order once they age out of the 30 s window, so
/// C3 always sees a single (model, spectrum) stream in strictly
/// increasing trace-timestamp order (spec §5).
struct ReorderBuffer {
    buffered: BTreeMap<DateTime<Utc>, Vec<Trace>>,
    newest_seen: Option<DateTime<Utc>>,
}

impl ReorderBuffer {
    fn new() -> Self {
        Self {
            buffered: BTreeMap::new(),
            newest_seen: None,
        }
    }

    /// Admits `trace`, returning `true` if accepted. Traces older than
    /// 30 s relative to the newest timestamp seen so far are dropped.
    fn push(&mut self, trace: Trace) -> bool {
        let newest = self.newest_seen.get_or_insert(trace.timestamp);
        if trace.timestamp > *newest {
            *newest = trace.timestamp;
        }
        if *newest - trace.timestamp > REORDER_WINDOW {
            return false;
        }
        self.buffered.entry(trace.timestamp).or_default().push(trace);
        true
    }

    /// Drains every buffered trace whose timestamp has aged past the
    /// reorder window, oldest first.
    fn drain_ready(&mut self) -> Vec<Trace> {
        let Some(newest) = self.newest_seen else {
            return Vec::new();
        };
        let cutoff = newest - REORDER_WINDOW;
        let tail = self.buffered.split_off(&(cutoff + ChronoDuration::milliseconds(1)));
        let ready = std::mem::replace(&mut self.buffered, tail);
        ready.into_values().flatten().collect()
    }
}

/// One `ReorderBuffer` per (model, spectrum) stream. The 30 s reorder/drop
/// contract in spec §5 is scoped to "a single (model, spectrum)"; sharing
/// one clock across every stream on the trace channel would let one
/// model's newer traces advance `newest_seen` and drop a different
/// model's legitimately fresh traces, which §5 never licenses.
struct KeyedReorderBuffers {
    streams: HashMap<(String, String), ReorderBuffer>,
}

impl KeyedReorderBuffers {
    fn new() -> Self {
        Self { streams: HashMap::new() }
    }

    fn key_for(trace: &Trace) -> (String, String) {
        let spectrum = trace.spectrum.map(|s| s.as_str().to_string()).unwrap_or_else(|| "unknown".to_string());
        (trace.model.clone(), spectrum)
    }

    fn push(&mut self, trace: Trace) -> bool {
        let key = Self::key_for(&trace);
        self.streams.entry(key).or_insert_with(ReorderBuffer::new).push(trace)
    }

    fn drain_ready(&mut self) -> Vec<Trace> {
        self.streams.values_mut().flat_map(|b| b.drain_ready()).collect()
    }
}

/// Consumes traces in arrival order, reorders within a bounded window,
/// scores each with C2, pushes the score into C3, and forwards any
/// resulting events downstream to the monitor task (spec §4.8, §5).
async fn scorer_task(
    state: Arc<AppState>,
    mut trace_rx: mpsc::Receiver<Trace>,
    event_tx: mpsc::Sender<MonitorEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buffer = KeyedReorderBuffers::new();
    let mut flush_tick = tokio::time::interval(std::time::Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(task = TaskName::Scorer.as_str(), "shutting down");
                return;
            }
            maybe_trace = trace_rx.recv() => {
                match maybe_trace {
                    Some(trace) => {
                        if !buffer.push(trace) {
                            debug!(task = TaskName::Scorer.as_str(), "trace dropped: older than reorder window");
                        }
                    }
                    None => {
                        info!(task = TaskName::Scorer.as_str(), "trace channel closed, shutting down");
                        return;
                    }
                }
            }
            _ = flush_tick.tick() => {}
        }

        for trace in buffer.drain_ready() {
            let default_spectrum = state.default_spectrum(&trace.model);
            let score = QualityScorer::score(&trace, default_spectrum);
            state.trace_cache.record(&score.model, &score.spectrum, trace, score.overall);

            for event in state.monitor.ingest(&score) {
                if event_tx.try_send(event).is_err() {
                    warn!(task = TaskName::Scorer.as_str(), "event channel saturated, dropping monitor event");
                }
            }
        }
        state.set_task_health(TaskName::Scorer, TaskHealth::Running);
    }
}

/// Forwards C3's events to C4 and periodically logs the aggregate state
/// of every tracked window (spec §4.8: "periodically asks C3 for fresh
/// aggregates").
async fn monitor_task(state: Arc<AppState>, mut event_rx: mpsc::Receiver<MonitorEvent>, mut shutdown: broadcast::Receiver<()>) {
    let mut aggregate_tick = tokio::time::interval(state.config.forecast_interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(task = TaskName::Monitor.as_str(), "shutting down");
                return;
            }
            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        state.alerts.publish(event.kind, event.severity, event.subject, event.measured_value, event.threshold);
                        state.set_task_health(TaskName::Monitor, TaskHealth::Running);
                    }
                    None => {
                        info!(task = TaskName::Monitor.as_str(), "event channel closed, shutting down");
                        return;
                    }
                }
            }
            _ = aggregate_tick.tick() => {
                for snap in state.monitor.snapshot() {
                    debug!(
                        model = %snap.model,
                        spectrum = %snap.spectrum,
                        mean = snap.stats.mean,
                        count = snap.stats.count,
                        "window aggregate"
                    );
                }
            }
        }
    }
}

fn trigger_reason_for(kind: AlertKind) -> Option<TriggerReason> {
    match kind {
        AlertKind::ThresholdBreach => Some(TriggerReason::ThresholdBreach),
        AlertKind::TrendDown => Some(TriggerReason::TrendDown),
        AlertKind::ForecastRegression => Some(TriggerReason::ForecastRegression),
        AlertKind::VarianceHigh | AlertKind::DeploymentFailed | AlertKind::AuthFailure | AlertKind::ResourceExhaustion => None,
    }
}

/// Subscribes to C4 and decides whether quality-degradation alerts
/// warrant starting a C6 cycle; also fires a scheduled cycle for every
/// tracked (model, spectrum) pair once `cycle_interval` elapses (spec
/// §4.6 "a scheduled cycle elapses (default 4h)"). Concurrency cap and
/// per-key cooldown are enforced inside the engine itself; this task
/// only maps alerts and the schedule tick to trigger decisions (spec
/// §4.8, §5).
async fn coordinator_task(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut alert_rx = state.alerts.subscribe();
    let mut schedule_tick = tokio::time::interval(state.config.cycle_interval);
    schedule_tick.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(task = TaskName::Coordinator.as_str(), "shutting down");
                return;
            }
            received = alert_rx.recv() => {
                match received {
                    Ok(alert) => handle_alert(&state, alert),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(task = TaskName::Coordinator.as_str(), skipped, "alert receiver lagged, some alerts missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(task = TaskName::Coordinator.as_str(), "alert bus closed, shutting down");
                        return;
                    }
                }
            }
            _ = schedule_tick.tick() => {
                trigger_scheduled_cycles(&state);
            }
        }
        state.set_task_health(TaskName::Coordinator, TaskHealth::Running);
    }
}

/// Fires a `Scheduled` cycle for every currently tracked (model,
/// spectrum) pair. Pairs with an untagged (`unknown`) spectrum are
/// skipped, same as alert-driven triggers; the engine's own
/// cooldown/in-flight bookkeeping absorbs any overlap with an
/// alert-driven cycle that is already running for the same pair.
fn trigger_scheduled_cycles(state: &Arc<AppState>) {
    for snap in state.monitor.snapshot() {
        let Some(spectrum) = Spectrum::parse(&snap.spectrum) else {
            continue;
        };
        let cycle_id = state.engine.trigger(snap.model.clone(), spectrum, TriggerReason::Scheduled);
        info!(
            cycle_id = %cycle_id,
            model = %snap.model,
            spectrum = spectrum.as_str(),
            "optimization cycle triggered on schedule"
        );
    }
}

fn handle_alert(state: &Arc<AppState>, alert: Alert) {
    let Some(reason) = trigger_reason_for(alert.kind) else {
        return;
    };
    if alert.subject.model == "*" {
        return;
    }
    let Some(spectrum) = Spectrum::parse(&alert.subject.spectrum) else {
        debug!(spectrum = %alert.subject.spectrum, "skipping optimization trigger for untagged spectrum");
        return;
    };
    let cycle_id = state.engine.trigger(alert.subject.model.clone(), spectrum, reason);
    info!(
        cycle_id = %cycle_id,
        model = %alert.subject.model,
        spectrum = spectrum.as_str(),
        reason = ?reason,
        "optimization cycle triggered from alert"
    );
}
