//! Welch's t-test evaluation for candidate vs. baseline prompt variants
//! (spec §4.6 step 3).
//!
//! Grounded on `vault/rnjd.rs` and `vault/updown15m.rs`'s use of
//! `statrs::distribution::{Normal, ContinuousCDF}` for closed-form
//! probability lookups; here the same crate's `StudentsT` distribution
//! replaces the ad-hoc normal approximation since sample sizes are small
//! (n_min = 10).

use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::config::Config;
use crate::models::{ABTest, ABTestStatus};

const MIN_IMPROVEMENT: f64 = 0.02;
const P_VALUE_THRESHOLD: f64 = 0.05;

/// Feeds one fresh sample from either arm into the running test,
/// recomputing mean/variance with Welford's online algorithm, then
/// decides whether the test should stop (spec: early stop when
/// `p < 0.05 AND |mean_candidate - mean_baseline| >= 0.02 AND both arms
/// have >= n_min samples`, otherwise continue to `target_n`).
pub fn ingest_baseline(test: &mut ABTest, value: f64) {
    welford_update(&mut test.collected_n_baseline, &mut test.mean_baseline, &mut test.variance_baseline, value);
}

pub fn ingest_candidate(test: &mut ABTest, value: f64) {
    welford_update(&mut test.collected_n_candidate, &mut test.mean_candidate, &mut test.variance_candidate, value);
}

fn welford_update(n: &mut usize, mean: &mut f64, m2: &mut f64, value: f64) {
    // `m2` accumulates the running sum of squared deviations (Welford's
    // online algorithm) while the test is still collecting samples;
    // `maybe_decide` normalizes it into `variance_*` via `sample_variance`
    // once the test reaches a terminal status, so the `ABTest` fields
    // always hold a true sample variance, never a raw M2, once `status`
    // stops being `Running`.
    *n += 1;
    let delta = value - *mean;
    *mean += delta / *n as f64;
    let delta2 = value - *mean;
    *m2 += delta * delta2;
}

fn sample_variance(m2: f64, n: usize) -> f64 {
    if n < 2 {
        0.0
    } else {
        m2 / (n - 1) as f64
    }
}

/// Welch's t-test p-value (two-sided) for two independent samples with
/// known mean/variance/n, using the Welch–Satterthwaite degrees of
/// freedom approximation.
pub fn welch_p_value(mean_a: f64, var_a: f64, n_a: usize, mean_b: f64, var_b: f64, n_b: usize) -> Option<f64> {
    if n_a < 2 || n_b < 2 {
        return None;
    }
    let (n_a, n_b) = (n_a as f64, n_b as f64);
    let se2_a = var_a / n_a;
    let se2_b = var_b / n_b;
    let se = (se2_a + se2_b).sqrt();
    if se <= 0.0 {
        return None;
    }

    let t_stat = (mean_a - mean_b) / se;

    let df_num = (se2_a + se2_b).powi(2);
    let df_den = se2_a.powi(2) / (n_a - 1.0) + se2_b.powi(2) / (n_b - 1.0);
    let df = if df_den > 0.0 { df_num / df_den } else { n_a + n_b - 2.0 };

    let dist = StudentsT::new(0.0, 1.0, df.max(1.0)).ok()?;
    let p_one_sided = 1.0 - dist.cdf(t_stat.abs());
    Some((p_one_sided * 2.0).clamp(0.0, 1.0))
}

/// Evaluates whether the test should stop now and, if so, transitions
/// its `status`. Returns `true` if it transitioned (i.e. the caller
/// should stop sampling). On any terminal transition, `variance_baseline`
/// and `variance_candidate` are overwritten in place with the normalized
/// per-sample variance (spec §3 `ABTest`: those fields are variances, not
/// the raw Welford M2 accumulator they hold while `status == Running`).
pub fn maybe_decide(test: &mut ABTest, config: &Config) -> bool {
    let both_past_min = test.collected_n_baseline >= config.ab_min_n && test.collected_n_candidate >= config.ab_min_n;

    if both_past_min {
        let var_baseline = sample_variance(test.variance_baseline, test.collected_n_baseline);
        let var_candidate = sample_variance(test.variance_candidate, test.collected_n_candidate);

        if let Some(p) = welch_p_value(
            test.mean_candidate,
            var_candidate,
            test.collected_n_candidate,
            test.mean_baseline,
            var_baseline,
            test.collected_n_baseline,
        ) {
            let improvement = test.mean_candidate - test.mean_baseline;
            if p < P_VALUE_THRESHOLD && improvement.abs() >= MIN_IMPROVEMENT {
                test.status = if improvement > 0.0 {
                    ABTestStatus::DecidedCandidate
                } else {
                    ABTestStatus::DecidedBaseline
                };
                test.variance_baseline = var_baseline;
                test.variance_candidate = var_candidate;
                return true;
            }
        }
    }

    let both_at_target = test.collected_n_baseline >= test.target_n && test.collected_n_candidate >= test.target_n;
    if both_at_target {
        test.variance_baseline = sample_variance(test.variance_baseline, test.collected_n_baseline);
        test.variance_candidate = sample_variance(test.variance_candidate, test.collected_n_candidate);
        test.status = ABTestStatus::Inconclusive;
        return true;
    }

    false
}
