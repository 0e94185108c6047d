//! Content-hash snapshot naming and persistence for `ServingConfig` bodies
//! (spec §4.7 step 2, §6 "Persisted state layout").
//!
//! Grounded on the `sha2`/`hex` pairing already used for fingerprinting in
//! `crate::learning::store::feature_fingerprint`.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::ServingConfig;

/// Stable content hash of a `ServingConfig`, used both as its snapshot
/// filename and as `pre_snapshot_ref`/`post_snapshot_ref` on
/// `DeploymentRecord`s.
pub fn content_hash(config: &ServingConfig) -> String {
    let canonical = serde_json::to_vec(config).expect("ServingConfig always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Owns the `snapshots/` directory: one JSON file per distinct config
/// body, named by its content hash, so two deployments that converge on
/// the same body collapse to one file.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: &str) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self { dir: PathBuf::from(dir) })
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.json"))
    }

    /// Persists `config` under its content hash if not already present.
    /// Returns the hash, which is also valid as `pre_snapshot_ref` /
    /// `post_snapshot_ref`.
    pub fn persist(&self, config: &ServingConfig) -> anyhow::Result<String> {
        let hash = content_hash(config);
        let path = self.path_for(&hash);
        if !path.exists() {
            let body = serde_json::to_vec_pretty(config)?;
            fs::write(&path, body)?;
        }
        Ok(hash)
    }

    pub fn load(&self, hash: &str) -> anyhow::Result<ServingConfig> {
        let path = self.path_for(hash);
        let body = fs::read(&path).map_err(|e| anyhow::anyhow!("snapshot {hash} unreadable: {e}"))?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub fn exists(&self, hash: &str) -> bool {
        Path::new(&self.path_for(hash)).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(prompt: &str) -> ServingConfig {
        let mut c = ServingConfig::default();
        c.system_prompts.insert("m:s".into(), prompt.into());
        c
    }

    #[test]
    fn identical_bodies_hash_identically() {
        assert_eq!(content_hash(&cfg("x")), content_hash(&cfg("x")));
    }

    #[test]
    fn distinct_bodies_hash_differently() {
        assert_ne!(content_hash(&cfg("x")), content_hash(&cfg("y")));
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path().to_str().unwrap()).unwrap();
        let c = cfg("hello");
        let hash = store.persist(&c).unwrap();
        assert!(store.exists(&hash));
        let loaded = store.load(&hash).unwrap();
        assert_eq!(loaded, c);
    }
}
