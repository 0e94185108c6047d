//! Shared orchestrator state: the handles every background task and HTTP
//! handler reaches through (spec §4.8).
//!
//! Grounded on the teacher's `DataSourceKillSwitch` in `main.rs`, which
//! tracks per-source enabled/halted state from consecutive-failure
//! counts — generalized here to a per-task health map covering all four
//! background tasks, not just the data feed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::alerts::AlertBus;
use crate::config::Config;
use crate::deploy::DeploymentManager;
use crate::learning::LearningStore;
use crate::models::Spectrum;
use crate::monitor::QualityMonitor;
use crate::optimize::{OptimizationEngine, RecentTraceCache};
use crate::trace_client::TraceClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
    Poller,
    Scorer,
    Monitor,
    Coordinator,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::Poller => "poller",
            TaskName::Scorer => "scorer",
            TaskName::Monitor => "monitor",
            TaskName::Coordinator => "coordinator",
        }
    }
}

/// Per-task health, surfaced on the status endpoint (spec §4.8, SPEC_FULL
/// supplement "task health reporting").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskHealth {
    Running,
    Degraded(String),
    Halted(String),
}

impl TaskHealth {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskHealth::Running => "running",
            TaskHealth::Degraded(_) => "degraded",
            TaskHealth::Halted(_) => "halted",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TaskHealth::Running => None,
            TaskHealth::Degraded(r) | TaskHealth::Halted(r) => Some(r),
        }
    }
}

/// Owns every component instance (C1-C7) plus the ambient cross-task
/// bookkeeping C8 needs: task health, per-model default spectrum, and the
/// shutdown broadcast (spec §9: "process-wide state is limited to the
/// HTTP server and the orchestrator handle").
pub struct AppState {
    pub config: Arc<Config>,
    pub trace_client: Arc<TraceClient>,
    pub monitor: Arc<QualityMonitor>,
    pub alerts: Arc<AlertBus>,
    pub learning_store: Arc<LearningStore>,
    pub trace_cache: Arc<RecentTraceCache>,
    pub engine: Arc<OptimizationEngine>,
    pub deployer: Arc<DeploymentManager>,
    pub shutdown: broadcast::Sender<()>,
    task_health: RwLock<HashMap<TaskName, TaskHealth>>,
    default_spectrums: RwLock<HashMap<String, Spectrum>>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Arc<Self>> {
        let (shutdown, _) = broadcast::channel(1);

        let trace_client = Arc::new(TraceClient::new(config.clone()));
        let monitor = Arc::new(QualityMonitor::new(config.clone()));
        let alerts = Arc::new(AlertBus::new(
            &config,
            crate::alerts::default_sinks(&config),
        ));
        let learning_store = LearningStore::open(&config.learning_store_path)?;
        let trace_cache = Arc::new(RecentTraceCache::new(config.window_capacity));
        let deployer = DeploymentManager::new(config.clone())?;
        let engine = Arc::new(OptimizationEngine::new(
            config.clone(),
            learning_store.clone(),
            trace_cache.clone(),
            deployer.clone(),
            alerts.clone(),
            shutdown.clone(),
        ));

        let mut task_health = HashMap::new();
        for name in [TaskName::Poller, TaskName::Scorer, TaskName::Monitor, TaskName::Coordinator] {
            task_health.insert(name, TaskHealth::Running);
        }

        Ok(Arc::new(Self {
            config,
            trace_client,
            monitor,
            alerts,
            learning_store,
            trace_cache,
            engine,
            deployer,
            shutdown,
            task_health: RwLock::new(task_health),
            default_spectrums: RwLock::new(HashMap::new()),
        }))
    }

    pub fn set_task_health(&self, name: TaskName, health: TaskHealth) {
        self.task_health.write().insert(name, health);
    }

    pub fn task_health_snapshot(&self) -> HashMap<TaskName, TaskHealth> {
        self.task_health.read().clone()
    }

    /// The configured fallback spectrum for `model`, if any (spec §9
    /// "spectrum auto-tagging": no guessing, only an explicit default).
    pub fn default_spectrum(&self, model: &str) -> Option<Spectrum> {
        self.default_spectrums.read().get(model).copied()
    }

    pub fn set_default_spectrum(&self, model: String, spectrum: Spectrum) {
        self.default_spectrums.write().insert(model, spectrum);
    }
}
