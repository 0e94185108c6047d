//! Core data model: traces, quality scores, alerts, patterns, variants,
//! A/B tests, and deployment records. See spec §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An immutable execution trace pulled from the observability backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub spectrum: Option<Spectrum>,
    pub input: String,
    pub output: String,
    pub latency_ms: u64,
    pub tool_calls: Vec<String>,
    pub error: bool,
    pub user_feedback_score: Option<f64>,
}

/// The closed set of 7 orthogonal evaluation dimensions (spec §9: no
/// plugin loading, no reflection — bound at compile time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spectrum {
    CustomerIdentity,
    FinancialAnalysis,
    CreditAnalysis,
    TransactionHistory,
    MultiFieldSearch,
    ConversationalContext,
    Performance,
}

impl Spectrum {
    pub const ALL: [Spectrum; 7] = [
        Spectrum::CustomerIdentity,
        Spectrum::FinancialAnalysis,
        Spectrum::CreditAnalysis,
        Spectrum::TransactionHistory,
        Spectrum::MultiFieldSearch,
        Spectrum::ConversationalContext,
        Spectrum::Performance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Spectrum::CustomerIdentity => "customer_identity",
            Spectrum::FinancialAnalysis => "financial_analysis",
            Spectrum::CreditAnalysis => "credit_analysis",
            Spectrum::TransactionHistory => "transaction_history",
            Spectrum::MultiFieldSearch => "multi_field_search",
            Spectrum::ConversationalContext => "conversational_context",
            Spectrum::Performance => "performance",
        }
    }

    /// Parses the wire/tag form back into a Spectrum. Returns `None` for
    /// `unknown` or any unrecognized tag rather than guessing (spec §9).
    pub fn parse(s: &str) -> Option<Spectrum> {
        Spectrum::ALL.into_iter().find(|sp| sp.as_str() == s)
    }
}

impl std::fmt::Display for Spectrum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sub-scores that compose a QualityScore's overall value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub accuracy: f64,
    pub completeness: f64,
    pub relevance: f64,
    pub professionalism: f64,
    pub latency_penalty: f64,
}

/// Deterministic per-trace quality evaluation. Identical input yields an
/// identical score (spec §4.2, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub trace_id: String,
    pub model: String,
    /// Tagged `unknown` when the trace carried no spectrum and the model
    /// has no configured default (spec §9 "spectrum auto-tagging").
    pub spectrum: String,
    pub overall: f64,
    pub subscores: SubScores,
    pub scored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ThresholdBreach,
    TrendDown,
    VarianceHigh,
    ForecastRegression,
    DeploymentFailed,
    AuthFailure,
    ResourceExhaustion,
}

/// Subject of an alert: the (model, spectrum) pair it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertSubject {
    pub model: String,
    pub spectrum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub kind: AlertKind,
    pub subject: AlertSubject,
    pub measured_value: f64,
    pub threshold: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternLabel {
    Success,
    Failure,
}

/// A feature-fingerprinted observation of a successful or failing
/// interaction, persisted by the Learning Store (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub feature_fingerprint: String,
    pub label: PatternLabel,
    pub spectrum: Spectrum,
    /// Laplace-smoothed `(successes + 1) / (support + 2)`.
    pub confidence: f64,
    pub support: u64,
    pub successes: u64,
    pub last_used: DateTime<Utc>,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    PatternMerge,
    Clarity,
    Structure,
    Examples,
    MetaLearned,
}

impl GenerationStrategy {
    pub const ALL: [GenerationStrategy; 5] = [
        GenerationStrategy::PatternMerge,
        GenerationStrategy::Clarity,
        GenerationStrategy::Structure,
        GenerationStrategy::Examples,
        GenerationStrategy::MetaLearned,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVariant {
    pub id: String,
    pub parent_id: Option<String>,
    pub spectrum: Spectrum,
    pub text: String,
    pub generation_strategy: GenerationStrategy,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ABTestStatus {
    Running,
    DecidedCandidate,
    DecidedBaseline,
    Inconclusive,
    Aborted,
}

impl ABTestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ABTestStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ABTest {
    pub id: String,
    pub baseline_variant_id: String,
    pub candidate_variant_id: String,
    pub spectrum: Spectrum,
    pub target_n: usize,
    pub collected_n_baseline: usize,
    pub collected_n_candidate: usize,
    pub mean_baseline: f64,
    pub mean_candidate: f64,
    pub variance_baseline: f64,
    pub variance_candidate: f64,
    pub status: ABTestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigDeltaType {
    SystemPrompt,
    Temperature,
    ModelSelection,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDelta {
    #[serde(rename = "type")]
    pub delta_type: ConfigDeltaType,
    pub component: String,
    pub before: String,
    pub after: String,
    pub reason: String,
    pub expected_impact: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentActor {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deployed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: DeploymentActor,
    pub changes: Vec<ConfigDelta>,
    pub pre_snapshot_ref: String,
    pub post_snapshot_ref: String,
    pub validation_result: Option<String>,
    pub status: DeploymentStatus,
    /// Present only on `rolled_back` records: the record being reversed.
    pub rolls_back: Option<String>,
}

/// Prompt configuration mutated by the deployment manager (spec §4.7, §6).
///
/// The two maps use `BTreeMap` rather than `HashMap` so that
/// `serde_json::to_vec` always serializes fields in the same order for
/// equal contents — `HashMap`'s per-instance `RandomState` would
/// otherwise make `content_hash` (spec §4.7 step 2) non-reproducible
/// across process restarts and reloads of byte-for-byte identical
/// configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServingConfig {
    pub system_prompts: BTreeMap<String, String>,
    pub temperature: f64,
    pub timeout_ms: u64,
    pub model_selection: BTreeMap<String, String>,
}
