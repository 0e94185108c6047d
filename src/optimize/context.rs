//! Pattern mining and context-bundle assembly for the `analyzing` stage
//! (spec §4.6 step 1).
//!
//! `trace_features` is the pure Trace → feature vector extractor the
//! spectrum's pattern extractor is specified to be (spec §3); it feeds
//! both the Learning Store's fingerprinting and the k-NN similarity
//! search.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::learning::LearningStore;
use crate::models::{Pattern, PatternLabel, Spectrum, Trace};
use crate::optimize::variant::ContextBundle;

/// Deterministic feature vector for a trace: latency (seconds),
/// tool-call count, normalized output length, and the error flag as 0/1.
/// Used both to fingerprint patterns and to measure similarity.
pub fn trace_features(trace: &Trace) -> Vec<f64> {
    vec![
        trace.latency_ms as f64 / 1000.0,
        trace.tool_calls.len() as f64,
        (trace.output.len() as f64 / 500.0).min(10.0),
        if trace.error { 1.0 } else { 0.0 },
    ]
}

/// Bounded per-(model, spectrum) ring buffer of recently scored traces,
/// fed by the orchestrator's scorer task alongside C3 ingestion so C6 can
/// mine patterns without re-polling C1 (spec §4.6: "fetch top-N recent
/// traces for (model, spectrum)").
pub struct RecentTraceCache {
    capacity: usize,
    by_key: RwLock<std::collections::HashMap<(String, String), VecDeque<(Trace, f64)>>>,
}

impl RecentTraceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_key: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn record(&self, model: &str, spectrum: &str, trace: Trace, overall: f64) {
        let mut map = self.by_key.write();
        let buf = map.entry((model.to_string(), spectrum.to_string())).or_insert_with(VecDeque::new);
        buf.push_back((trace, overall));
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    pub fn recent(&self, model: &str, spectrum: &str, n: usize) -> Vec<(Trace, f64)> {
        self.by_key
            .read()
            .get(&(model.to_string(), spectrum.to_string()))
            .map(|buf| buf.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }
}

/// Mines success/failure patterns from a batch of scored traces, records
/// them into the Learning Store, and assembles the context bundle the
/// `generating` stage needs.
pub fn mine_and_assemble(
    store: &LearningStore,
    traces_with_scores: &[(Trace, f64)],
    spectrum: Spectrum,
    baseline_text: String,
    min_confidence: f64,
    min_support: u64,
) -> ContextBundle {
    for (trace, overall) in traces_with_scores {
        let label = if *overall >= 0.80 { PatternLabel::Success } else { PatternLabel::Failure };
        let features = trace_features(trace);
        if let Err(e) = store.record(spectrum, features, label) {
            warn!(spectrum = spectrum.as_str(), error = %e, "failed to record pattern observation");
        }
    }

    let success_patterns: Vec<Pattern> = store
        .query(spectrum, min_confidence, min_support, 10)
        .into_iter()
        .filter(|p| p.label == PatternLabel::Success)
        .collect();
    let failure_patterns: Vec<Pattern> = store
        .query(spectrum, 0.0, min_support, 10)
        .into_iter()
        .filter(|p| p.label == PatternLabel::Failure)
        .collect();

    ContextBundle {
        spectrum,
        baseline_text,
        success_patterns,
        failure_patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trace(id: &str, latency_ms: u64, error: bool) -> Trace {
        Trace {
            id: id.into(),
            timestamp: Utc::now(),
            model: "gpt-x".into(),
            provider: "acme".into(),
            spectrum: Some(Spectrum::CreditAnalysis),
            input: "x".into(),
            output: "y".repeat(50),
            latency_ms,
            tool_calls: vec![],
            error,
            user_feedback_score: None,
        }
    }

    #[test]
    fn cache_evicts_beyond_capacity() {
        let cache = RecentTraceCache::new(2);
        cache.record("gpt-x", "credit_analysis", trace("a", 100, false), 0.9);
        cache.record("gpt-x", "credit_analysis", trace("b", 100, false), 0.9);
        cache.record("gpt-x", "credit_analysis", trace("c", 100, false), 0.9);
        let recent = cache.recent("gpt-x", "credit_analysis", 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].0.id, "c");
    }

    #[test]
    fn feature_vector_is_deterministic() {
        let t = trace("a", 1500, true);
        assert_eq!(trace_features(&t), trace_features(&t));
    }
}
