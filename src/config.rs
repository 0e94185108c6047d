//! Environment-driven configuration.
//!
//! Every tunable named in spec §§3–6 has a typed default here. Two
//! observability-API credentials are mandatory; everything else falls back
//! to the documented default when its env var is absent or unparsable.

use std::env;
use std::time::Duration;

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parsed(key, default_secs))
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Observability API key header value. Required, no OAuth fallback.
    pub observability_api_key: String,
    /// Observability organization identifier header value. Required.
    pub observability_org_id: String,
    /// Base URL of the external observability API.
    pub observability_base_url: String,

    /// Poller cadence (default 60s).
    pub poll_interval: Duration,
    /// Max requests/minute across all outbound observability calls (default 60).
    pub rate_limit_per_minute: u32,
    /// Dedup LRU capacity for trace ids (default 10,000).
    pub trace_dedup_capacity: usize,
    /// Hard per-call outbound timeout (default 30s).
    pub request_timeout: Duration,

    /// RollingWindow capacity (default 200).
    pub window_capacity: usize,
    /// RollingWindow time horizon (default 1h).
    pub window_horizon: Duration,
    /// Consecutive samples required to trip a threshold breach (default 5).
    pub threshold_trip_k: usize,
    /// Consecutive samples above threshold+0.02 required to clear (default 5).
    pub threshold_clear_k: usize,
    pub threshold_critical: f64,
    pub threshold_warning: f64,
    pub threshold_target: f64,
    pub threshold_excellent: f64,
    pub trend_down_slope: f64,
    pub trend_down_mean_cap: f64,
    pub variance_high_stdev: f64,
    /// Forecast recompute cadence by sample count (default 20).
    pub forecast_every_n_samples: usize,
    /// Forecast recompute cadence by wall clock (default 15 min).
    pub forecast_interval: Duration,
    /// Forecast horizon (default 7 days).
    pub forecast_horizon: Duration,
    /// EW smoothing factor for forecasting (default 0.3).
    pub forecast_alpha: f64,

    /// Alert bus bounded queue size (default 10,000).
    pub alert_queue_capacity: usize,
    /// Alert dedup cooldown (default 5 min).
    pub alert_cooldown: Duration,
    /// Optional webhook sink URL.
    pub alert_webhook_url: Option<String>,

    /// Minimum support before a Pattern is visible to the optimizer (default 3).
    pub pattern_min_support: u32,

    /// Max candidate variants per cycle (default 4).
    pub max_variants: usize,
    /// Target samples per A/B arm (default 30).
    pub ab_target_n: usize,
    /// Minimum samples per arm before early stopping is considered (default 10).
    pub ab_min_n: usize,
    /// Scheduled optimization cycle cadence (default 4h).
    pub cycle_interval: Duration,
    /// Per-(model,spectrum) cooldown between cycles (default 1h).
    pub cycle_cooldown: Duration,
    /// Wall-clock budget per cycle (default 30 min).
    pub cycle_budget: Duration,
    /// Global concurrent-optimization cap (default 3).
    pub cycle_concurrency_cap: usize,

    /// Storage path for the Learning Store (default `./data/learning.store`).
    pub learning_store_path: String,
    /// Storage path for the deployment audit log (default `./data/deployments.log`).
    pub deployment_log_path: String,
    /// Directory for config snapshots (default `./data/snapshots`).
    pub snapshot_dir: String,
    /// Number of most-recent DeploymentRecords kept by `clear-history` (default 1,000).
    pub audit_retention: usize,

    /// Control-API rate limit (default 60/min).
    pub control_rate_limit_per_minute: u32,
    /// HTTP bind port.
    pub http_port: u16,

    /// Validation probe required mean overall score (default 0.90).
    pub validation_min_mean: f64,
    /// Validation probe max allowed per-spectrum regression (default 0.05).
    pub validation_max_regression: f64,

    /// Shutdown grace period (default 10s).
    pub shutdown_grace: Duration,
}

impl Config {
    /// Loads configuration from the environment. `.env` is loaded first if present.
    ///
    /// # Errors
    /// Returns an error if either observability credential is missing.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let observability_api_key = env::var("OBSERVABILITY_API_KEY")
            .map_err(|_| anyhow::anyhow!("OBSERVABILITY_API_KEY is required"))?;
        let observability_org_id = env::var("OBSERVABILITY_ORG_ID")
            .map_err(|_| anyhow::anyhow!("OBSERVABILITY_ORG_ID is required"))?;

        Ok(Self {
            observability_api_key,
            observability_org_id,
            observability_base_url: env::var("OBSERVABILITY_BASE_URL")
                .unwrap_or_else(|_| "https://observability.internal".to_string()),

            poll_interval: env_secs("POLL_INTERVAL_SECS", 60),
            rate_limit_per_minute: env_parsed("RATE_LIMIT_PER_MINUTE", 60),
            trace_dedup_capacity: env_parsed("TRACE_DEDUP_CAPACITY", 10_000),
            request_timeout: env_secs("REQUEST_TIMEOUT_SECS", 30),

            window_capacity: env_parsed("WINDOW_CAPACITY", 200),
            window_horizon: env_secs("WINDOW_HORIZON_SECS", 3600),
            threshold_trip_k: env_parsed("THRESHOLD_TRIP_K", 5),
            threshold_clear_k: env_parsed("THRESHOLD_CLEAR_K", 5),
            threshold_critical: env_parsed("THRESHOLD_CRITICAL", 0.85),
            threshold_warning: env_parsed("THRESHOLD_WARNING", 0.90),
            threshold_target: env_parsed("THRESHOLD_TARGET", 0.95),
            threshold_excellent: env_parsed("THRESHOLD_EXCELLENT", 0.98),
            trend_down_slope: env_parsed("TREND_DOWN_SLOPE", -0.002),
            trend_down_mean_cap: env_parsed("TREND_DOWN_MEAN_CAP", 0.92),
            variance_high_stdev: env_parsed("VARIANCE_HIGH_STDEV", 0.08),
            forecast_every_n_samples: env_parsed("FORECAST_EVERY_N_SAMPLES", 20),
            forecast_interval: env_secs("FORECAST_INTERVAL_SECS", 15 * 60),
            forecast_horizon: Duration::from_secs(env_parsed("FORECAST_HORIZON_SECS", 7 * 24 * 3600)),
            forecast_alpha: env_parsed("FORECAST_ALPHA", 0.3),

            alert_queue_capacity: env_parsed("ALERT_QUEUE_CAPACITY", 10_000),
            alert_cooldown: env_secs("ALERT_COOLDOWN_SECS", 5 * 60),
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),

            pattern_min_support: env_parsed("PATTERN_MIN_SUPPORT", 3),

            max_variants: env_parsed("MAX_VARIANTS", 4),
            ab_target_n: env_parsed("AB_TARGET_N", 30),
            ab_min_n: env_parsed("AB_MIN_N", 10),
            cycle_interval: env_secs("CYCLE_INTERVAL_SECS", 4 * 3600),
            cycle_cooldown: env_secs("CYCLE_COOLDOWN_SECS", 3600),
            cycle_budget: env_secs("CYCLE_BUDGET_SECS", 30 * 60),
            cycle_concurrency_cap: env_parsed("CYCLE_CONCURRENCY_CAP", 3),

            learning_store_path: env::var("LEARNING_STORE_PATH")
                .unwrap_or_else(|_| "./data/learning.store".to_string()),
            deployment_log_path: env::var("DEPLOYMENT_LOG_PATH")
                .unwrap_or_else(|_| "./data/deployments.log".to_string()),
            snapshot_dir: env::var("SNAPSHOT_DIR").unwrap_or_else(|_| "./data/snapshots".to_string()),
            audit_retention: env_parsed("AUDIT_RETENTION", 1_000),

            control_rate_limit_per_minute: env_parsed("CONTROL_RATE_LIMIT_PER_MINUTE", 60),
            http_port: env_parsed("HTTP_PORT", 8080),

            validation_min_mean: env_parsed("VALIDATION_MIN_MEAN", 0.90),
            validation_max_regression: env_parsed("VALIDATION_MAX_REGRESSION", 0.05),

            shutdown_grace: env_secs("SHUTDOWN_GRACE_SECS", 10),
        })
    }
}
