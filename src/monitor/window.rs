//! Rolling window of QualityScores per (model, spectrum), with O(W)
//! mean/variance/slope recomputation (spec §3, §4.3).
//!
//! Grounded on `route_quality/baseline.rs`'s `BaselineCalculator`: a
//! time-pruned `VecDeque` of samples plus a cached set of derived
//! statistics, recalculated on demand rather than incrementally.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    at: DateTime<Utc>,
}

/// Derived statistics over a window's current contents.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    pub variance: f64,
    pub stdev: f64,
    /// OLS slope of score over sample index (not wall-clock time).
    pub slope: f64,
}

/// Bounded ordered sequence of scores for one (model, spectrum) pair.
/// Capacity `W` and time horizon `H` both apply; eviction is oldest-first
/// (spec §3 invariant).
pub struct RollingWindow {
    capacity: usize,
    horizon: Duration,
    samples: VecDeque<Sample>,
}

impl RollingWindow {
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            horizon,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a score observed at `at`. Traces must arrive in
    /// trace-timestamp order (the scorer is responsible for reordering
    /// within its bounded window before calling this).
    pub fn push(&mut self, value: f64, at: DateTime<Utc>) {
        self.samples.push_back(Sample { value, at });
        self.evict(at);
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        if let Ok(horizon) = chrono::Duration::from_std(self.horizon) {
            let cutoff = now - horizon;
            while let Some(front) = self.samples.front() {
                if front.at < cutoff {
                    self.samples.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Read-only snapshot of retained values, oldest first (spec §5:
    /// "external readers go through a read-only snapshot accessor").
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn stats(&self) -> WindowStats {
        let n = self.samples.len();
        if n == 0 {
            return WindowStats::default();
        }
        let values: Vec<f64> = self.samples.iter().map(|s| s.value).collect();
        let mean = values.iter().sum::<f64>() / n as f64;

        let variance = if n < 2 {
            0.0
        } else {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        };

        WindowStats {
            count: n,
            mean,
            variance,
            stdev: variance.sqrt(),
            slope: ols_slope(&values),
        }
    }
}

/// Ordinary least squares slope of `values` against their index 0..n.
fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        num += (x - x_mean) * (y - y_mean);
        den += (x - x_mean).powi(2);
    }
    if den.abs() < 1e-12 {
        0.0
    } else {
        num / den
    }
}
