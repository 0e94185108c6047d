//! Closed-set spectrum definitions: weights, targets, entity lists, and
//! disallowed tokens bound at compile time (spec §9 "closed variant set").

use crate::models::Spectrum;

#[derive(Debug, Clone, Copy)]
pub struct SubScoreWeights {
    pub accuracy: f64,
    pub completeness: f64,
    pub relevance: f64,
    pub professionalism: f64,
    pub latency_penalty: f64,
}

impl SubScoreWeights {
    pub fn sum(&self) -> f64 {
        self.accuracy + self.completeness + self.relevance + self.professionalism + self.latency_penalty
    }
}

/// Everything the scorer (C2) needs for one spectrum: its pattern
/// extractor inputs (entity list, required sections, disallowed tokens)
/// plus its weight vector and target.
#[derive(Debug, Clone)]
pub struct SpectrumDef {
    pub spectrum: Spectrum,
    pub weights: SubScoreWeights,
    /// Weights used when `Trace.error == true`, if the spectrum is
    /// error-aware (spec §4.2: "unless the spectrum defines error-aware
    /// weights").
    pub error_weights: Option<SubScoreWeights>,
    pub target: f64,
    pub target_latency_ms: u64,
    pub expected_entities: &'static [&'static str],
    pub required_sections: &'static [&'static str],
    pub disallowed_tokens: &'static [&'static str],
}

const DEFAULT_WEIGHTS: SubScoreWeights = SubScoreWeights {
    accuracy: 0.30,
    completeness: 0.25,
    relevance: 0.25,
    professionalism: 0.10,
    latency_penalty: 0.10,
};

impl SpectrumDef {
    pub fn for_spectrum(spectrum: Spectrum) -> &'static SpectrumDef {
        match spectrum {
            Spectrum::CustomerIdentity => &CUSTOMER_IDENTITY,
            Spectrum::FinancialAnalysis => &FINANCIAL_ANALYSIS,
            Spectrum::CreditAnalysis => &CREDIT_ANALYSIS,
            Spectrum::TransactionHistory => &TRANSACTION_HISTORY,
            Spectrum::MultiFieldSearch => &MULTI_FIELD_SEARCH,
            Spectrum::ConversationalContext => &CONVERSATIONAL_CONTEXT,
            Spectrum::Performance => &PERFORMANCE,
        }
    }
}

static CUSTOMER_IDENTITY: SpectrumDef = SpectrumDef {
    spectrum: Spectrum::CustomerIdentity,
    weights: DEFAULT_WEIGHTS,
    error_weights: None,
    target: 0.95,
    target_latency_ms: 3000,
    expected_entities: &["customer_id", "account_number", "full_name", "date_of_birth"],
    required_sections: &["identity_confirmation", "verification_method"],
    disallowed_tokens: &["ssn_full", "raw_password"],
};

static FINANCIAL_ANALYSIS: SpectrumDef = SpectrumDef {
    spectrum: Spectrum::FinancialAnalysis,
    weights: SubScoreWeights {
        accuracy: 0.35,
        completeness: 0.25,
        relevance: 0.20,
        professionalism: 0.10,
        latency_penalty: 0.10,
    },
    error_weights: None,
    target: 0.95,
    target_latency_ms: 4000,
    expected_entities: &["balance", "income", "debt_ratio", "credit_utilization"],
    required_sections: &["summary", "key_metrics", "recommendation"],
    disallowed_tokens: &["tool_call_raw", "stack_trace"],
};

static CREDIT_ANALYSIS: SpectrumDef = SpectrumDef {
    spectrum: Spectrum::CreditAnalysis,
    weights: SubScoreWeights {
        accuracy: 0.35,
        completeness: 0.30,
        relevance: 0.20,
        professionalism: 0.10,
        latency_penalty: 0.05,
    },
    // Error-aware: a tool-invocation error on a credit pull is still
    // partially scoreable on professionalism of the fallback response.
    error_weights: Some(SubScoreWeights {
        accuracy: 0.0,
        completeness: 0.0,
        relevance: 0.0,
        professionalism: 0.6,
        latency_penalty: 0.4,
    }),
    target: 0.95,
    target_latency_ms: 4000,
    expected_entities: &["credit_score", "credit_report", "dispute_status", "tradeline"],
    required_sections: &["score_summary", "factors", "next_steps"],
    disallowed_tokens: &["tool_call_raw", "internal_error_code"],
};

static TRANSACTION_HISTORY: SpectrumDef = SpectrumDef {
    spectrum: Spectrum::TransactionHistory,
    weights: DEFAULT_WEIGHTS,
    error_weights: None,
    target: 0.95,
    target_latency_ms: 3500,
    expected_entities: &["transaction_id", "amount", "merchant", "date"],
    required_sections: &["transaction_list"],
    disallowed_tokens: &["raw_json_dump"],
};

static MULTI_FIELD_SEARCH: SpectrumDef = SpectrumDef {
    spectrum: Spectrum::MultiFieldSearch,
    weights: SubScoreWeights {
        accuracy: 0.25,
        completeness: 0.30,
        relevance: 0.30,
        professionalism: 0.10,
        latency_penalty: 0.05,
    },
    error_weights: None,
    target: 0.92,
    target_latency_ms: 4500,
    expected_entities: &[],
    required_sections: &["matches", "search_criteria"],
    disallowed_tokens: &["raw_query_dump"],
};

static CONVERSATIONAL_CONTEXT: SpectrumDef = SpectrumDef {
    spectrum: Spectrum::ConversationalContext,
    weights: SubScoreWeights {
        accuracy: 0.15,
        completeness: 0.15,
        relevance: 0.40,
        professionalism: 0.20,
        latency_penalty: 0.10,
    },
    error_weights: None,
    target: 0.92,
    target_latency_ms: 2500,
    expected_entities: &[],
    required_sections: &[],
    disallowed_tokens: &["raw_tool_payload"],
};

static PERFORMANCE: SpectrumDef = SpectrumDef {
    spectrum: Spectrum::Performance,
    weights: SubScoreWeights {
        accuracy: 0.10,
        completeness: 0.10,
        relevance: 0.10,
        professionalism: 0.10,
        latency_penalty: 0.60,
    },
    error_weights: None,
    target: 0.95,
    target_latency_ms: 1500,
    expected_entities: &[],
    required_sections: &[],
    disallowed_tokens: &[],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_spectrum_weights_sum_to_one() {
        for s in Spectrum::ALL {
            let def = SpectrumDef::for_spectrum(s);
            assert!(
                (def.weights.sum() - 1.0).abs() < 1e-9,
                "{:?} weights sum to {}",
                s,
                def.weights.sum()
            );
            if let Some(ew) = &def.error_weights {
                assert!((ew.sum() - 1.0).abs() < 1e-9);
            }
        }
    }
}
