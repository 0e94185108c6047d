//! Tiered threshold crossing with hysteresis (spec §4.3).
//!
//! Grounded on `route_quality/mitigation.rs`'s `CircuitBreaker`: a small
//! per-key state machine (closed/open analogue) driven by consecutive
//! counters rather than instantaneous comparisons, to avoid flapping.

use crate::config::Config;
use crate::models::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Critical,
    Warning,
    Target,
    Excellent,
}

impl Tier {
    fn severity(self) -> Severity {
        match self {
            Tier::Critical => Severity::Critical,
            Tier::Warning => Severity::High,
            Tier::Target => Severity::Medium,
            Tier::Excellent => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TierState {
    breached: bool,
    consecutive_below: usize,
    consecutive_clear: usize,
}

/// Result of evaluating one fresh mean/slope/stdev triple against a
/// window's threshold state.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEvent {
    pub severity: Severity,
    pub measured_value: f64,
    pub threshold: f64,
    pub kind: ThresholdEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdEventKind {
    ThresholdBreach,
    TrendDown,
    VarianceHigh,
}

/// Per-(model, spectrum) hysteresis tracker over the four configured
/// tiers. Owned by the Quality Monitor, one instance per window.
pub struct ThresholdTracker {
    tiers: [(Tier, f64); 4],
    trip_k: usize,
    clear_k: usize,
    trend_down_slope: f64,
    trend_down_mean_cap: f64,
    variance_high_stdev: f64,
    state: [TierState; 4],
}

impl ThresholdTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            tiers: [
                (Tier::Critical, config.threshold_critical),
                (Tier::Warning, config.threshold_warning),
                (Tier::Target, config.threshold_target),
                (Tier::Excellent, config.threshold_excellent),
            ],
            trip_k: config.threshold_trip_k.max(1),
            clear_k: config.threshold_clear_k.max(1),
            trend_down_slope: config.trend_down_slope,
            trend_down_mean_cap: config.trend_down_mean_cap,
            variance_high_stdev: config.variance_high_stdev,
            state: [TierState::default(); 4],
        }
    }

    /// Feeds one fresh window statistic snapshot, returning any events
    /// triggered. A tier only re-fires `ThresholdBreach` on the clear→breach
    /// transition, not on every sample while still breached.
    pub fn evaluate(&mut self, mean: f64, slope: f64, stdev: f64) -> Vec<ThresholdEvent> {
        let mut events = Vec::new();

        for (i, (tier, threshold)) in self.tiers.into_iter().enumerate() {
            let s = &mut self.state[i];
            if s.breached {
                if mean > threshold + 0.02 {
                    s.consecutive_clear += 1;
                    s.consecutive_below = 0;
                    if s.consecutive_clear >= self.clear_k {
                        s.breached = false;
                        s.consecutive_clear = 0;
                    }
                } else {
                    s.consecutive_clear = 0;
                }
            } else if mean < threshold {
                s.consecutive_below += 1;
                s.consecutive_clear = 0;
                if s.consecutive_below >= self.trip_k {
                    s.breached = true;
                    s.consecutive_below = 0;
                    events.push(ThresholdEvent {
                        severity: tier.severity(),
                        measured_value: mean,
                        threshold,
                        kind: ThresholdEventKind::ThresholdBreach,
                    });
                }
            } else {
                s.consecutive_below = 0;
            }
        }

        if slope < self.trend_down_slope && mean < self.trend_down_mean_cap {
            events.push(ThresholdEvent {
                severity: Severity::High,
                measured_value: slope,
                threshold: self.trend_down_slope,
                kind: ThresholdEventKind::TrendDown,
            });
        }

        if stdev > self.variance_high_stdev {
            events.push(ThresholdEvent {
                severity: Severity::Medium,
                measured_value: stdev,
                threshold: self.variance_high_stdev,
                kind: ThresholdEventKind::VarianceHigh,
            });
        }

        events
    }
}
