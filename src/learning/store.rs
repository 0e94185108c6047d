//! Persistent pattern store keyed by feature fingerprint (spec §4.5).
//!
//! Grounded on `vault/vault_db.rs`'s lock-guarded single-writer handle
//! shape, adapted from SQLite to the line-delimited JSON file the spec
//! mandates (spec §6 "Persisted state layout"): one append-only file,
//! replayed at startup into an in-memory index.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Pattern, PatternLabel, Spectrum};

/// Computes the stable fingerprint used to key a Pattern: spectrum plus
/// features rounded to 4 decimal places, so near-duplicate floating point
/// noise maps to the same pattern.
pub fn feature_fingerprint(spectrum: Spectrum, features: &[f64]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spectrum.as_str().as_bytes());
    for f in features {
        hasher.update(format!("{:.4}", f).as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn laplace_confidence(successes: u64, support: u64) -> f64 {
    (successes as f64 + 1.0) / (support as f64 + 2.0)
}

pub struct LearningStore {
    patterns: RwLock<HashMap<String, Pattern>>,
    file: Mutex<File>,
}

impl LearningStore {
    /// Opens (creating if absent) the store at `path`, replaying any
    /// existing lines into the in-memory index before accepting writes.
    pub fn open(path: &str) -> anyhow::Result<Arc<Self>> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut patterns = HashMap::new();
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Pattern>(&line) {
                    Ok(p) => {
                        patterns.insert(p.feature_fingerprint.clone(), p);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed learning store line");
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Arc::new(Self {
            patterns: RwLock::new(patterns),
            file: Mutex::new(file),
        }))
    }

    /// Records one observation: creates the pattern on first sight,
    /// otherwise updates support/confidence in place (spec §3: "never
    /// deleted, but may fall below display thresholds").
    pub fn record(&self, spectrum: Spectrum, features: Vec<f64>, label: PatternLabel) -> anyhow::Result<Pattern> {
        let fingerprint = feature_fingerprint(spectrum, &features);
        let now = Utc::now();

        let mut patterns = self.patterns.write();
        let pattern = patterns
            .entry(fingerprint.clone())
            .and_modify(|p| {
                p.support += 1;
                if label == PatternLabel::Success {
                    p.successes += 1;
                }
                p.confidence = laplace_confidence(p.successes, p.support);
                p.last_used = now;
                p.label = label;
            })
            .or_insert_with(|| {
                let successes = if label == PatternLabel::Success { 1 } else { 0 };
                Pattern {
                    id: Uuid::new_v4().to_string(),
                    feature_fingerprint: fingerprint.clone(),
                    label,
                    spectrum,
                    confidence: laplace_confidence(successes, 1),
                    support: 1,
                    successes,
                    last_used: now,
                    features,
                }
            })
            .clone();

        self.append(&pattern)?;
        Ok(pattern)
    }

    fn append(&self, pattern: &Pattern) -> anyhow::Result<()> {
        let line = serde_json::to_string(pattern)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Patterns for `spectrum` at or above `min_confidence`, excluding
    /// those below the configured minimum support, highest confidence
    /// first, capped at `limit`.
    pub fn query(&self, spectrum: Spectrum, min_confidence: f64, min_support: u64, limit: usize) -> Vec<Pattern> {
        let patterns = self.patterns.read();
        let mut matches: Vec<Pattern> = patterns
            .values()
            .filter(|p| p.spectrum == spectrum && p.confidence >= min_confidence && p.support >= min_support)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        matches
    }

    /// k-nearest patterns to `features` by Euclidean distance. Linear
    /// scan is acceptable for the store sizes this system targets (spec
    /// §4.5: "no external vector database required").
    pub fn similar(&self, features: &[f64], k: usize) -> Vec<Pattern> {
        let patterns = self.patterns.read();
        let mut scored: Vec<(f64, Pattern)> = patterns
            .values()
            .map(|p| (euclidean_distance(&p.features, features), p.clone()))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, p)| p).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let sum_sq: f64 = (0..n).map(|i| (a[i] - b[i]).powi(2)).sum();
    let pad_a: f64 = a[n..].iter().map(|v| v.powi(2)).sum();
    let pad_b: f64 = b[n..].iter().map(|v| v.powi(2)).sum();
    (sum_sq + pad_a + pad_b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_creates_then_updates_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.store");
        let store = LearningStore::open(path.to_str().unwrap()).unwrap();

        let p1 = store
            .record(Spectrum::CreditAnalysis, vec![1.0, 2.0], PatternLabel::Success)
            .unwrap();
        assert_eq!(p1.support, 1);
        assert_eq!(p1.successes, 1);

        let p2 = store
            .record(Spectrum::CreditAnalysis, vec![1.0, 2.0], PatternLabel::Failure)
            .unwrap();
        assert_eq!(p2.id, p1.id);
        assert_eq!(p2.support, 2);
        assert_eq!(p2.successes, 1);
        assert!((p2.confidence - (2.0 / 4.0)).abs() < 1e-9);
    }

    #[test]
    fn reload_from_disk_reconstructs_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.store");
        {
            let store = LearningStore::open(path.to_str().unwrap()).unwrap();
            store
                .record(Spectrum::Performance, vec![0.1, 0.2], PatternLabel::Success)
                .unwrap();
        }
        let reopened = LearningStore::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn query_filters_by_confidence_and_support() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.store");
        let store = LearningStore::open(path.to_str().unwrap()).unwrap();
        store
            .record(Spectrum::CreditAnalysis, vec![1.0], PatternLabel::Success)
            .unwrap();
        let results = store.query(Spectrum::CreditAnalysis, 0.5, 3, 10);
        assert!(results.is_empty(), "support below min_support must be hidden");
    }

    #[test]
    fn similar_returns_closest_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.store");
        let store = LearningStore::open(path.to_str().unwrap()).unwrap();
        store.record(Spectrum::Performance, vec![0.0, 0.0], PatternLabel::Success).unwrap();
        store.record(Spectrum::Performance, vec![10.0, 10.0], PatternLabel::Success).unwrap();
        let nearest = store.similar(&[0.1, 0.1], 1);
        assert_eq!(nearest.len(), 1);
        assert!((nearest[0].features[0] - 0.0).abs() < 1e-9);
    }

    proptest::proptest! {
        /// §8 property: confidence is a monotone function of success ratio
        /// at fixed support.
        #[test]
        fn confidence_is_monotone_in_success_ratio(support in 1u64..500, a in 0u64..500, b in 0u64..500) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            proptest::prop_assume!(lo <= support && hi <= support);
            let c_lo = laplace_confidence(lo, support);
            let c_hi = laplace_confidence(hi, support);
            proptest::prop_assert!(c_lo <= c_hi);
        }
    }
}
