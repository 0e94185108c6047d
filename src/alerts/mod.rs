//! C4 — Alert Bus: bounded, de-duplicated, severity-tagged event fan-out.
//!
//! Grounded on `route_quality/integration.rs`'s `RouteQualityIntegration`:
//! an owned broadcast channel plus a shared, lock-guarded state map that
//! subscribers can snapshot independently of the event stream.

mod sinks;

pub use sinks::{AlertSink, LogSink, WebhookSink};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Alert, AlertKind, AlertSubject, Severity};

const BROADCAST_CAPACITY: usize = 1024;

/// Builds the default sink set from configuration: always a log sink,
/// plus a webhook sink when one is configured (spec §4.4).
pub fn default_sinks(config: &Config) -> Vec<Arc<dyn AlertSink>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];
    if let Some(url) = &config.alert_webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone())));
    }
    sinks
}

/// Bounded, de-duplicated alert queue with fan-out to zero or more sinks
/// (spec §4.4). Sink failures never block ingestion.
pub struct AlertBus {
    capacity: usize,
    cooldown: chrono::Duration,
    queue: RwLock<VecDeque<Alert>>,
    index: RwLock<HashMap<(AlertKind, AlertSubject), usize>>,
    tx: broadcast::Sender<Alert>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertBus {
    pub fn new(config: &Config, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            capacity: config.alert_queue_capacity,
            cooldown: chrono::Duration::from_std(config.alert_cooldown).unwrap_or(chrono::Duration::minutes(5)),
            queue: RwLock::new(VecDeque::with_capacity(config.alert_queue_capacity.min(1024))),
            index: RwLock::new(HashMap::new()),
            tx,
            sinks,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }

    /// Publishes one occurrence of `(kind, subject)`. Within the cooldown
    /// window, a repeat bumps `count`/`last_seen` on the existing alert
    /// instead of emitting a new one; sinks only see genuinely new or
    /// cooldown-expired occurrences.
    pub fn publish(&self, kind: AlertKind, severity: Severity, subject: AlertSubject, measured_value: f64, threshold: f64) {
        let now = Utc::now();
        let key = (kind, subject.clone());

        let mut queue = self.queue.write();
        let mut index = self.index.write();

        if let Some(&pos) = index.get(&key) {
            if let Some(existing) = queue.get_mut(pos) {
                if now.signed_duration_since(existing.last_seen) < self.cooldown {
                    existing.count += 1;
                    existing.last_seen = now;
                    existing.measured_value = measured_value;
                    debug!(kind = ?kind, "alert suppressed within cooldown, count bumped");
                    return;
                }
            }
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            severity,
            kind,
            subject: subject.clone(),
            measured_value,
            threshold,
            first_seen: now,
            last_seen: now,
            count: 1,
        };

        if queue.len() >= self.capacity {
            self.drop_oldest_lowest_severity(&mut queue, &mut index);
        }

        queue.push_back(alert.clone());
        index.insert(key, queue.len() - 1);
        drop(queue);
        drop(index);

        let _ = self.tx.send(alert.clone());
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&alert) {
                warn!(sink = sink.name(), error = %e, "alert sink failed, continuing");
            }
        }
    }

    /// Drops the lowest-severity entry among the oldest quarter of the
    /// queue, per spec §4.4's `drop-oldest-lowest-severity` policy, then
    /// rebuilds the index (O(capacity), called only on overflow).
    fn drop_oldest_lowest_severity(&self, queue: &mut VecDeque<Alert>, index: &mut HashMap<(AlertKind, AlertSubject), usize>) {
        let horizon = (queue.len() / 4).max(1);
        let victim = queue
            .iter()
            .take(horizon)
            .enumerate()
            .min_by_key(|(_, a)| a.severity)
            .map(|(i, _)| i);

        if let Some(i) = victim {
            queue.remove(i);
        } else {
            queue.pop_front();
        }

        index.clear();
        for (i, a) in queue.iter().enumerate() {
            index.insert((a.kind, a.subject.clone()), i);
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.queue.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.read().is_empty()
    }

    /// Prunes queue entries below severity `Medium`, used by the control
    /// API's clear-history endpoint companion for alerts (the audit trim
    /// itself lives in C7).
    pub fn clear_resolved(&self) {
        let mut queue = self.queue.write();
        let mut index = self.index.write();
        queue.retain(|a| a.severity >= Severity::Medium);
        index.clear();
        for (i, a) in queue.iter().enumerate() {
            index.insert((a.kind, a.subject.clone()), i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            observability_api_key: "k".into(),
            observability_org_id: "o".into(),
            observability_base_url: "http://x".into(),
            poll_interval: std::time::Duration::from_secs(60),
            rate_limit_per_minute: 60,
            trace_dedup_capacity: 100,
            request_timeout: std::time::Duration::from_secs(30),
            window_capacity: 200,
            window_horizon: std::time::Duration::from_secs(3600),
            threshold_trip_k: 5,
            threshold_clear_k: 5,
            threshold_critical: 0.85,
            threshold_warning: 0.90,
            threshold_target: 0.95,
            threshold_excellent: 0.98,
            trend_down_slope: -0.002,
            trend_down_mean_cap: 0.92,
            variance_high_stdev: 0.08,
            forecast_every_n_samples: 20,
            forecast_interval: std::time::Duration::from_secs(900),
            forecast_horizon: std::time::Duration::from_secs(604_800),
            forecast_alpha: 0.3,
            alert_queue_capacity: 4,
            alert_cooldown: std::time::Duration::from_secs(300),
            alert_webhook_url: None,
            pattern_min_support: 3,
            max_variants: 4,
            ab_target_n: 30,
            ab_min_n: 10,
            cycle_interval: std::time::Duration::from_secs(14_400),
            cycle_cooldown: std::time::Duration::from_secs(3600),
            cycle_budget: std::time::Duration::from_secs(1800),
            cycle_concurrency_cap: 3,
            learning_store_path: "./data/learning.store".into(),
            deployment_log_path: "./data/deployments.log".into(),
            snapshot_dir: "./data/snapshots".into(),
            audit_retention: 1_000,
            control_rate_limit_per_minute: 60,
            http_port: 8080,
            validation_min_mean: 0.90,
            validation_max_regression: 0.05,
            shutdown_grace: std::time::Duration::from_secs(10),
        }
    }

    fn subject() -> AlertSubject {
        AlertSubject {
            model: "gpt-x".into(),
            spectrum: "credit_analysis".into(),
        }
    }

    #[test]
    fn duplicate_within_cooldown_bumps_count_not_new_alert() {
        let bus = AlertBus::new(&test_config(), vec![]);
        bus.publish(AlertKind::ThresholdBreach, Severity::Critical, subject(), 0.8, 0.85);
        bus.publish(AlertKind::ThresholdBreach, Severity::Critical, subject(), 0.79, 0.85);
        let alerts = bus.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].count, 2);
    }

    #[test]
    fn distinct_subjects_are_not_deduplicated() {
        let bus = AlertBus::new(&test_config(), vec![]);
        bus.publish(AlertKind::ThresholdBreach, Severity::Critical, subject(), 0.8, 0.85);
        let mut other = subject();
        other.model = "gpt-y".into();
        bus.publish(AlertKind::ThresholdBreach, Severity::Critical, other, 0.8, 0.85);
        assert_eq!(bus.active_alerts().len(), 2);
    }

    #[test]
    fn overflow_drops_lowest_severity_among_oldest() {
        let bus = AlertBus::new(&test_config(), vec![]);
        for i in 0..4 {
            let mut s = subject();
            s.spectrum = format!("s{i}");
            let sev = if i == 0 { Severity::Low } else { Severity::Critical };
            bus.publish(AlertKind::ThresholdBreach, sev, s, 0.8, 0.85);
        }
        assert_eq!(bus.len(), 4);
        let mut s = subject();
        s.spectrum = "s4".into();
        bus.publish(AlertKind::ThresholdBreach, Severity::Critical, s, 0.8, 0.85);
        assert_eq!(bus.len(), 4);
        assert!(bus.active_alerts().iter().all(|a| a.severity != Severity::Low));
    }

    #[test]
    fn subscribers_receive_published_alerts() {
        let bus = AlertBus::new(&test_config(), vec![]);
        let mut rx = bus.subscribe();
        bus.publish(AlertKind::VarianceHigh, Severity::Medium, subject(), 0.2, 0.08);
        let received = rx.try_recv().expect("alert should be delivered");
        assert_eq!(received.kind, AlertKind::VarianceHigh);
    }
}
