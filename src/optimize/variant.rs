//! Deterministic templated prompt variant generation (spec §4.6 step 2).
//!
//! No external LLM call is required; each strategy is a pure function of
//! the context bundle, so the same bundle always yields the same
//! variants (spec §9: "deterministic fallback implementation").

use chrono::Utc;
use uuid::Uuid;

use crate::models::{GenerationStrategy, Pattern, PromptVariant, Spectrum};

/// Everything C6's `analyzing` stage assembles before generation: the
/// currently deployed baseline text plus mined success/failure patterns
/// for this (model, spectrum).
pub struct ContextBundle {
    pub spectrum: Spectrum,
    pub baseline_text: String,
    pub success_patterns: Vec<Pattern>,
    pub failure_patterns: Vec<Pattern>,
}

/// Produces up to `max_variants` candidates, one per distinct strategy
/// from the closed set, in a fixed strategy order so output is stable
/// across runs given the same bundle.
pub fn generate_variants(bundle: &ContextBundle, max_variants: usize, parent_id: &str) -> Vec<PromptVariant> {
    GenerationStrategy::ALL
        .into_iter()
        .take(max_variants.min(GenerationStrategy::ALL.len()))
        .map(|strategy| {
            let text = apply_strategy(strategy, bundle);
            PromptVariant {
                id: Uuid::new_v4().to_string(),
                parent_id: Some(parent_id.to_string()),
                spectrum: bundle.spectrum,
                text,
                generation_strategy: strategy,
                created_at: Utc::now(),
            }
        })
        .collect()
}

fn apply_strategy(strategy: GenerationStrategy, bundle: &ContextBundle) -> String {
    match strategy {
        GenerationStrategy::PatternMerge => pattern_merge(bundle),
        GenerationStrategy::Clarity => clarity(bundle),
        GenerationStrategy::Structure => structure(bundle),
        GenerationStrategy::Examples => examples(bundle),
        GenerationStrategy::MetaLearned => meta_learned(bundle),
    }
}

fn top_fingerprints(patterns: &[Pattern], n: usize) -> Vec<String> {
    let mut sorted = patterns.to_vec();
    sorted.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    sorted.into_iter().take(n).map(|p| p.feature_fingerprint[..8.min(p.feature_fingerprint.len())].to_string()).collect()
}

fn pattern_merge(bundle: &ContextBundle) -> String {
    let successes = top_fingerprints(&bundle.success_patterns, 3);
    let failures = top_fingerprints(&bundle.failure_patterns, 3);
    let mut out = bundle.baseline_text.clone();
    out.push_str("\n\nReinforce the behaviors associated with prior high-confidence successes");
    if !successes.is_empty() {
        out.push_str(&format!(" (patterns {}).", successes.join(", ")));
    } else {
        out.push('.');
    }
    out.push_str(" Avoid the behaviors correlated with prior failures");
    if !failures.is_empty() {
        out.push_str(&format!(" (patterns {}).", failures.join(", ")));
    } else {
        out.push('.');
    }
    out
}

fn clarity(bundle: &ContextBundle) -> String {
    format!(
        "{}\n\nBe explicit and unambiguous. State the answer first, then the supporting reasoning. \
         Avoid hedging language; if information is missing, say so directly rather than guessing.",
        bundle.baseline_text
    )
}

fn structure(bundle: &ContextBundle) -> String {
    format!(
        "{}\n\nStructure every response with clearly labeled sections appropriate to the {} spectrum, \
         in a fixed order, so downstream consumers can parse it reliably.",
        bundle.baseline_text,
        bundle.spectrum.as_str()
    )
}

fn examples(bundle: &ContextBundle) -> String {
    let n_success = bundle.success_patterns.len();
    let n_failure = bundle.failure_patterns.len();
    format!(
        "{}\n\nThis configuration has been refined against {} confirmed successful interactions and \
         {} confirmed failures for this spectrum; match the structure and tone of the former, and \
         explicitly avoid the failure modes of the latter.",
        bundle.baseline_text, n_success, n_failure
    )
}

fn meta_learned(bundle: &ContextBundle) -> String {
    let avg_confidence = if bundle.success_patterns.is_empty() {
        0.0
    } else {
        bundle.success_patterns.iter().map(|p| p.confidence).sum::<f64>() / bundle.success_patterns.len() as f64
    };
    format!(
        "{}\n\nWeight instructions proportionally to historical confidence (current average confidence \
         across known successful patterns: {:.2}); prioritize the highest-confidence guidance when \
         instructions could conflict.",
        bundle.baseline_text, avg_confidence
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc as ChronoUtc;

    fn pattern(confidence: f64, fp: &str) -> Pattern {
        Pattern {
            id: "p".into(),
            feature_fingerprint: fp.into(),
            label: crate::models::PatternLabel::Success,
            spectrum: Spectrum::CreditAnalysis,
            confidence,
            support: 5,
            successes: 4,
            last_used: ChronoUtc::now(),
            features: vec![1.0, 2.0],
        }
    }

    fn bundle() -> ContextBundle {
        ContextBundle {
            spectrum: Spectrum::CreditAnalysis,
            baseline_text: "You are a credit analysis assistant.".into(),
            success_patterns: vec![pattern(0.9, "aaaaaaaaaaaa"), pattern(0.7, "bbbbbbbbbbbb")],
            failure_patterns: vec![pattern(0.3, "cccccccccccc")],
        }
    }

    #[test]
    fn generates_one_variant_per_strategy_up_to_max() {
        let b = bundle();
        let variants = generate_variants(&b, 4, "parent-1");
        assert_eq!(variants.len(), 4);
        let strategies: std::collections::HashSet<_> = variants.iter().map(|v| v.generation_strategy).collect();
        assert_eq!(strategies.len(), 4);
    }

    #[test]
    fn generation_is_deterministic() {
        let b = bundle();
        let a = generate_variants(&b, 3, "parent-1");
        let c = generate_variants(&b, 3, "parent-1");
        for (x, y) in a.iter().zip(c.iter()) {
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn caps_at_available_strategy_count() {
        let b = bundle();
        let variants = generate_variants(&b, 100, "parent-1");
        assert_eq!(variants.len(), GenerationStrategy::ALL.len());
    }
}
