//! Exponentially-weighted linear extrapolation forecasting (spec §4.3).
//!
//! Grounded on `route_quality/baseline.rs`'s `maybe_recalculate` gating
//! (recompute only every `recalculate_interval`) and on the EW smoothing
//! idiom from `other_examples/07f0c8e5_..._predictive-quality-src-lib.rs.rs`'s
//! forecaster module, adapted to a closed-form level/trend update instead
//! of a learned model.

use chrono::{DateTime, Utc};

/// A projected mean with an approximate confidence half-width, computed
/// from the EW residual variance (SPEC_FULL supplement: forecast
/// confidence band).
#[derive(Debug, Clone, Copy)]
pub struct Forecast {
    pub projected_mean: f64,
    pub confidence_half_width: f64,
}

/// Per-(model, spectrum) exponentially-weighted level/trend/interval
/// estimator. Cheap to update per sample; the monitor decides separately
/// when to actually act on a fresh projection (every F samples or every
/// T_forecast interval, spec §4.3).
pub struct ForecastEngine {
    alpha: f64,
    level: Option<f64>,
    trend: f64,
    avg_interval_secs: f64,
    residual_variance: f64,
    last_at: Option<DateTime<Utc>>,
    samples_since_forecast: usize,
    last_forecast_at: Option<DateTime<Utc>>,
}

impl ForecastEngine {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 0.99),
            level: None,
            trend: 0.0,
            avg_interval_secs: 0.0,
            residual_variance: 0.0,
            last_at: None,
            samples_since_forecast: 0,
            last_forecast_at: None,
        }
    }

    pub fn update(&mut self, value: f64, at: DateTime<Utc>) {
        let predicted = self.level.unwrap_or(value);
        let residual = value - predicted;
        self.residual_variance = self.alpha * residual.powi(2) + (1.0 - self.alpha) * self.residual_variance;

        match self.level {
            None => {
                self.level = Some(value);
                self.trend = 0.0;
            }
            Some(prev_level) => {
                let new_level = self.alpha * value + (1.0 - self.alpha) * (prev_level + self.trend);
                let diff = new_level - prev_level;
                self.trend = self.alpha * diff + (1.0 - self.alpha) * self.trend;
                self.level = Some(new_level);
            }
        }

        if let Some(last) = self.last_at {
            let interval = (at - last).num_milliseconds() as f64 / 1000.0;
            if interval > 0.0 {
                self.avg_interval_secs = if self.avg_interval_secs == 0.0 {
                    interval
                } else {
                    self.alpha * interval + (1.0 - self.alpha) * self.avg_interval_secs
                };
            }
        }
        self.last_at = Some(at);
        self.samples_since_forecast += 1;
    }

    /// Whether a fresh forecast should be computed now, per the dual
    /// sample-count / wall-clock gating in spec §4.3.
    pub fn due(&self, now: DateTime<Utc>, every_n_samples: usize, interval: std::time::Duration) -> bool {
        if self.samples_since_forecast >= every_n_samples.max(1) {
            return true;
        }
        match self.last_forecast_at {
            None => true,
            Some(last) => {
                let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
                elapsed >= interval.as_secs_f64()
            }
        }
    }

    /// Projects the level/trend `horizon` forward and resets the gating
    /// counters. Returns `None` if no data has been observed yet.
    pub fn forecast(&mut self, now: DateTime<Utc>, horizon: std::time::Duration) -> Option<Forecast> {
        let level = self.level?;
        self.samples_since_forecast = 0;
        self.last_forecast_at = Some(now);

        if self.avg_interval_secs <= 0.0 {
            return Some(Forecast {
                projected_mean: level.clamp(0.0, 1.0),
                confidence_half_width: self.residual_variance.sqrt(),
            });
        }

        let horizon_samples = horizon.as_secs_f64() / self.avg_interval_secs;
        let projected = level + self.trend * horizon_samples;
        let half_width = self.residual_variance.sqrt() * (1.0 + horizon_samples.sqrt() * 0.1);

        Some(Forecast {
            projected_mean: projected.clamp(0.0, 1.0),
            confidence_half_width: half_width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn no_forecast_before_any_data() {
        let mut e = ForecastEngine::new(0.3);
        assert!(e.forecast(t(0), std::time::Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn tracks_downtrend_and_projects_below_current_mean() {
        let mut e = ForecastEngine::new(0.3);
        let mut day = 0;
        for v in [0.96, 0.955, 0.95, 0.945, 0.94, 0.935, 0.93, 0.925, 0.92, 0.915] {
            e.update(v, t(day * 86_400));
            day += 1;
        }
        let f = e.forecast(t(day * 86_400), std::time::Duration::from_secs(7 * 86_400)).unwrap();
        assert!(f.projected_mean < 0.915);
    }

    #[test]
    fn flat_series_projects_near_current_level() {
        let mut e = ForecastEngine::new(0.3);
        for i in 0..10 {
            e.update(0.95, t(i * 3600));
        }
        let f = e.forecast(t(36_000), std::time::Duration::from_secs(3600)).unwrap();
        assert!((f.projected_mean - 0.95).abs() < 0.01);
    }

    #[test]
    fn due_triggers_on_sample_count() {
        let mut e = ForecastEngine::new(0.3);
        for i in 0..20 {
            e.update(0.95, t(i));
        }
        assert!(e.due(t(20), 20, std::time::Duration::from_secs(900)));
    }

    #[test]
    fn due_triggers_on_interval_even_with_few_samples() {
        let mut e = ForecastEngine::new(0.3);
        e.update(0.95, t(0));
        assert!(e.due(t(1000), 20, std::time::Duration::from_secs(900)));
    }
}
