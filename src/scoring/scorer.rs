//! Deterministic, pure, stateless quality scoring (spec §4.2).
//!
//! No I/O, no randomness, no shared state — scoring the same trace twice
//! yields identical `QualityScore`s (spec §8 "Round-trip / idempotence").

use std::collections::HashSet;

use chrono::Utc;

use crate::models::{QualityScore, SubScores, Trace};
use crate::scoring::spectrum::{SpectrumDef, SubScoreWeights};

const UNKNOWN_SPECTRUM: &str = "unknown";

/// Pure function object — carries no state, only behavior.
pub struct QualityScorer;

impl QualityScorer {
    /// Scores a trace. `default_spectrum` is the model's configured
    /// fallback when the trace itself carries none; if that is also
    /// absent the score is tagged `spectrum=unknown` (spec §9).
    pub fn score(trace: &Trace, default_spectrum: Option<crate::models::Spectrum>) -> QualityScore {
        let resolved = trace.spectrum.or(default_spectrum);

        let (spectrum_label, def) = match resolved {
            Some(s) => (s.as_str().to_string(), SpectrumDef::for_spectrum(s)),
            None => (
                UNKNOWN_SPECTRUM.to_string(),
                SpectrumDef::for_spectrum(crate::models::Spectrum::ConversationalContext),
            ),
        };

        let weights = if trace.error {
            def.error_weights.unwrap_or(def.weights)
        } else {
            def.weights
        };

        let subscores = if trace.error && def.error_weights.is_none() {
            SubScores::default()
        } else {
            SubScores {
                accuracy: accuracy(trace, def.expected_entities),
                completeness: completeness(trace, def.required_sections),
                relevance: relevance(trace, def.disallowed_tokens),
                professionalism: professionalism(trace),
                latency_penalty: latency_penalty(trace, def.target_latency_ms),
            }
        };

        let overall = if trace.error && def.error_weights.is_none() {
            0.0
        } else {
            weighted_overall(&subscores, &weights)
        };

        QualityScore {
            trace_id: trace.id.clone(),
            model: trace.model.clone(),
            spectrum: spectrum_label,
            overall: overall.clamp(0.0, 1.0),
            subscores,
            scored_at: Utc::now(),
        }
    }
}

fn weighted_overall(s: &SubScores, w: &SubScoreWeights) -> f64 {
    s.accuracy * w.accuracy
        + s.completeness * w.completeness
        + s.relevance * w.relevance
        + s.professionalism * w.professionalism
        + s.latency_penalty * w.latency_penalty
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn accuracy(trace: &Trace, expected_entities: &[&str]) -> f64 {
    if expected_entities.is_empty() {
        return 1.0;
    }
    let output_lower = trace.output.to_lowercase();
    let present = expected_entities
        .iter()
        .filter(|e| output_lower.contains(&e.to_lowercase()))
        .count();
    present as f64 / expected_entities.len() as f64
}

fn completeness(trace: &Trace, required_sections: &[&str]) -> f64 {
    if required_sections.is_empty() {
        return 1.0;
    }
    let output_lower = trace.output.to_lowercase();
    let present = required_sections
        .iter()
        .filter(|s| output_lower.contains(&s.to_lowercase().replace('_', " ")) || output_lower.contains(&s.to_lowercase()))
        .count();
    (present as f64 / required_sections.len() as f64).clamp(0.0, 1.0)
}

/// Cosine-similarity surrogate: normalized overlap of significant tokens
/// between input and output, penalized for disallowed tokens.
fn relevance(trace: &Trace, disallowed_tokens: &[&str]) -> f64 {
    let input_tokens: HashSet<String> = tokenize(&trace.input).into_iter().filter(|t| t.len() > 3).collect();
    let output_tokens: HashSet<String> = tokenize(&trace.output).into_iter().filter(|t| t.len() > 3).collect();

    let overlap_score = if input_tokens.is_empty() || output_tokens.is_empty() {
        0.0
    } else {
        let intersection = input_tokens.intersection(&output_tokens).count() as f64;
        let denom = ((input_tokens.len() * output_tokens.len()) as f64).sqrt();
        if denom > 0.0 {
            intersection / denom
        } else {
            0.0
        }
    };

    let output_lower = trace.output.to_lowercase();
    let violations = disallowed_tokens
        .iter()
        .filter(|t| output_lower.contains(&t.to_lowercase()))
        .count();
    let penalty = violations as f64 * 0.2;

    (overlap_score.min(1.0) - penalty).max(0.0)
}

const RAW_FORMAT_MARKERS: &[&str] = &["{\"", "[object ", "<tool_call>", "traceback (most recent"];

fn professionalism(trace: &Trace) -> f64 {
    let output_lower = trace.output.to_lowercase();
    let has_raw_markers = RAW_FORMAT_MARKERS.iter().any(|m| output_lower.contains(m));

    let sentence_count = trace
        .output
        .split(|c| c == '.' || c == '!' || c == '?')
        .filter(|s| s.trim().split_whitespace().count() >= 3)
        .count();
    let has_full_sentences = sentence_count > 0;

    match (has_raw_markers, has_full_sentences) {
        (false, true) => 1.0,
        (false, false) => 0.6,
        (true, true) => 0.4,
        (true, false) => 0.1,
    }
}

fn latency_penalty(trace: &Trace, target_ms: u64) -> f64 {
    if target_ms == 0 {
        return 0.0;
    }
    (1.0 - trace.latency_ms as f64 / target_ms as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Spectrum;
    use chrono::Utc;

    fn golden_trace(output: &str, latency_ms: u64, error: bool) -> Trace {
        Trace {
            id: "t1".into(),
            timestamp: Utc::now(),
            model: "gpt-x".into(),
            provider: "acme".into(),
            spectrum: Some(Spectrum::CreditAnalysis),
            input: "what is the credit score and report for this customer".into(),
            output: output.into(),
            latency_ms,
            tool_calls: vec![],
            error,
            user_feedback_score: None,
        }
    }

    #[test]
    fn deterministic_scoring() {
        let trace = golden_trace(
            "Score summary: credit score 720. Factors: on-time payments. Next steps: monitor credit report.",
            1200,
            false,
        );
        let a = QualityScorer::score(&trace, None);
        let b = QualityScorer::score(&trace, None);
        assert_eq!(a.overall, b.overall);
        assert_eq!(a.subscores.accuracy, b.subscores.accuracy);
    }

    #[test]
    fn overall_in_bounds() {
        let trace = golden_trace("short reply", 100, false);
        let score = QualityScorer::score(&trace, None);
        assert!(score.overall >= 0.0 && score.overall <= 1.0);
    }

    #[test]
    fn error_trace_scores_zero_without_error_weights() {
        let mut trace = golden_trace("anything", 100, true);
        trace.spectrum = Some(Spectrum::ConversationalContext);
        let score = QualityScorer::score(&trace, None);
        assert_eq!(score.overall, 0.0);
    }

    #[test]
    fn error_aware_spectrum_still_scores() {
        let trace = golden_trace("We were unable to retrieve the credit report at this time.", 500, true);
        let score = QualityScorer::score(&trace, None);
        assert!(score.overall > 0.0);
    }

    #[test]
    fn missing_spectrum_tags_unknown() {
        let mut trace = golden_trace("hello there", 500, false);
        trace.spectrum = None;
        let score = QualityScorer::score(&trace, None);
        assert_eq!(score.spectrum, "unknown");
    }

    #[test]
    fn missing_spectrum_uses_model_default() {
        let mut trace = golden_trace("hello there", 500, false);
        trace.spectrum = None;
        let score = QualityScorer::score(&trace, Some(Spectrum::Performance));
        assert_eq!(score.spectrum, "performance");
    }

    #[test]
    fn latency_penalty_clips_to_zero() {
        let trace = golden_trace("anything", 100_000, false);
        let score = QualityScorer::score(&trace, None);
        assert_eq!(score.subscores.latency_penalty, 0.0);
    }

    #[test]
    fn no_expected_entities_yields_full_accuracy() {
        let mut trace = golden_trace("anything at all", 500, false);
        trace.spectrum = Some(Spectrum::Performance);
        let score = QualityScorer::score(&trace, None);
        assert_eq!(score.subscores.accuracy, 1.0);
    }

    proptest::proptest! {
        /// §8 property: scoring is deterministic and bounded to [0,1] for
        /// any latency/output-length/error combination.
        #[test]
        fn score_is_deterministic_and_bounded(
            latency_ms in 0u64..200_000,
            output_len in 0usize..2_000,
            error in proptest::bool::ANY,
        ) {
            let output = "word ".repeat(output_len / 5);
            let trace = golden_trace(&output, latency_ms, error);
            let a = QualityScorer::score(&trace, None);
            let b = QualityScorer::score(&trace, None);
            proptest::prop_assert_eq!(a.overall, b.overall);
            proptest::prop_assert!(a.overall >= 0.0 && a.overall <= 1.0);
        }
    }
}
