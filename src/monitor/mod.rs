//! C3 — Quality Monitor: rolling windows, tiered thresholds, trend and
//! variance detection, and predictive forecasting per (model, spectrum).

mod forecast;
mod thresholds;
mod window;

pub use forecast::Forecast;
pub use thresholds::{Tier, ThresholdEventKind};
pub use window::{RollingWindow, WindowStats};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::models::{AlertKind, AlertSubject, QualityScore, Severity};
use forecast::ForecastEngine;
use thresholds::ThresholdTracker;

/// One event surfaced to the Alert Bus (C4) as a result of ingesting a
/// fresh score.
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub subject: AlertSubject,
    pub kind: AlertKind,
    pub severity: Severity,
    pub measured_value: f64,
    pub threshold: f64,
}

/// Read-only view of one window's current state, for the status API and
/// test assertions (SPEC_FULL supplement: window snapshot accessor).
#[derive(Debug, Clone, serde::Serialize)]
pub struct WindowSnapshot {
    pub model: String,
    pub spectrum: String,
    pub stats: WindowStats,
    pub values: Vec<f64>,
}

struct Entry {
    window: RollingWindow,
    tracker: ThresholdTracker,
    forecast: ForecastEngine,
}

/// Owns one RollingWindow + ThresholdTracker + ForecastEngine per
/// (model, spectrum) pair, plus an aggregate window per model (spec §4.3:
/// "one RollingWindow per (model, spectrum) pair and one aggregate per
/// model").
pub struct QualityMonitor {
    config: Arc<Config>,
    entries: RwLock<HashMap<(String, String), Entry>>,
    model_aggregates: RwLock<HashMap<String, RollingWindow>>,
}

impl QualityMonitor {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            model_aggregates: RwLock::new(HashMap::new()),
        }
    }

    /// Ingests one fresh score, updating the relevant window and
    /// returning any events it triggered.
    pub fn ingest(&self, score: &QualityScore) -> Vec<MonitorEvent> {
        let key = (score.model.clone(), score.spectrum.clone());
        let mut events = Vec::new();

        {
            let mut aggregates = self.model_aggregates.write();
            aggregates
                .entry(score.model.clone())
                .or_insert_with(|| RollingWindow::new(self.config.window_capacity, self.config.window_horizon))
                .push(score.overall, score.scored_at);
        }

        let config = &self.config;
        let mut entries = self.entries.write();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
            window: RollingWindow::new(config.window_capacity, config.window_horizon),
            tracker: ThresholdTracker::new(config),
            forecast: ForecastEngine::new(config.forecast_alpha),
        });

        entry.window.push(score.overall, score.scored_at);
        let stats = entry.window.stats();

        let subject = AlertSubject {
            model: score.model.clone(),
            spectrum: score.spectrum.clone(),
        };

        for ev in entry.tracker.evaluate(stats.mean, stats.slope, stats.stdev) {
            let kind = match ev.kind {
                ThresholdEventKind::ThresholdBreach => AlertKind::ThresholdBreach,
                ThresholdEventKind::TrendDown => AlertKind::TrendDown,
                ThresholdEventKind::VarianceHigh => AlertKind::VarianceHigh,
            };
            events.push(MonitorEvent {
                subject: subject.clone(),
                kind,
                severity: ev.severity,
                measured_value: ev.measured_value,
                threshold: ev.threshold,
            });
        }

        entry.forecast.update(score.overall, score.scored_at);
        if entry
            .forecast
            .due(score.scored_at, self.config.forecast_every_n_samples, self.config.forecast_interval)
        {
            if let Some(f) = entry.forecast.forecast(score.scored_at, self.config.forecast_horizon) {
                if f.projected_mean < self.config.threshold_warning && stats.mean >= self.config.threshold_warning {
                    events.push(MonitorEvent {
                        subject: subject.clone(),
                        kind: AlertKind::ForecastRegression,
                        severity: Severity::High,
                        measured_value: f.projected_mean,
                        threshold: self.config.threshold_warning,
                    });
                }
            }
        }

        events
    }

    /// Read-only snapshot of every tracked (model, spectrum) window.
    pub fn snapshot(&self) -> Vec<WindowSnapshot> {
        self.entries
            .read()
            .iter()
            .map(|((model, spectrum), entry)| WindowSnapshot {
                model: model.clone(),
                spectrum: spectrum.clone(),
                stats: entry.window.stats(),
                values: entry.window.snapshot(),
            })
            .collect()
    }

    pub fn model_aggregate(&self, model: &str) -> Option<WindowStats> {
        self.model_aggregates.read().get(model).map(|w| w.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

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
            threshold_trip_k: 2,
            threshold_clear_k: 2,
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
            alert_queue_capacity: 10_000,
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

    fn score(model: &str, spectrum: &str, overall: f64, secs: i64) -> QualityScore {
        QualityScore {
            trace_id: "t".into(),
            model: model.into(),
            spectrum: spectrum.into(),
            overall,
            subscores: Default::default(),
            scored_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn degrading_scores_eventually_breach_threshold() {
        let monitor = QualityMonitor::new(Arc::new(test_config()));
        let mut breached = false;
        for i in 0..5 {
            let events = monitor.ingest(&score("gpt-x", "credit_analysis", 0.78, i));
            if events.iter().any(|e| e.kind == AlertKind::ThresholdBreach) {
                breached = true;
            }
        }
        assert!(breached);
    }

    #[test]
    fn snapshot_reports_every_tracked_pair() {
        let monitor = QualityMonitor::new(Arc::new(test_config()));
        monitor.ingest(&score("gpt-x", "credit_analysis", 0.95, 0));
        monitor.ingest(&score("gpt-y", "performance", 0.90, 1));
        let snap = monitor.snapshot();
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn model_aggregate_combines_spectrums() {
        let monitor = QualityMonitor::new(Arc::new(test_config()));
        monitor.ingest(&score("gpt-x", "credit_analysis", 0.95, 0));
        monitor.ingest(&score("gpt-x", "performance", 0.90, 1));
        let agg = monitor.model_aggregate("gpt-x").unwrap();
        assert_eq!(agg.count, 2);
    }
}
