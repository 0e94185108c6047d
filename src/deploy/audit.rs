//! Append-only `deployments.log` audit trail (spec §4.7, §6).
//!
//! Grounded on `crate::learning::store::LearningStore`'s
//! replay-on-open/append-only-file discipline, adapted from an
//! updated-in-place index to a pure audit trail: DeploymentRecords are
//! never mutated after being written, only appended (spec §3 invariant:
//! "DeploymentRecords are append-only").

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::models::{DeploymentRecord, DeploymentStatus};

pub struct DeploymentAuditLog {
    records: RwLock<Vec<DeploymentRecord>>,
    file: Mutex<File>,
}

impl DeploymentAuditLog {
    pub fn open(path: &str) -> anyhow::Result<Arc<Self>> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut records = Vec::new();
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DeploymentRecord>(&line) {
                    Ok(r) => records.push(r),
                    Err(e) => tracing::warn!(error = %e, "dropping malformed deployment log line"),
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Arc::new(Self {
            records: RwLock::new(records),
            file: Mutex::new(file),
        }))
    }

    pub fn append(&self, record: DeploymentRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(&record)?;
        {
            let mut file = self.file.lock();
            writeln!(file, "{line}")?;
            file.flush()?;
        }
        self.records.write().push(record);
        Ok(())
    }

    /// Most recent `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<DeploymentRecord> {
        let records = self.records.read();
        records.iter().rev().take(limit).cloned().collect()
    }

    /// The most recent `deployed` record, if any — the only record
    /// eligible for unrestricted rollback (spec §4.7: "Rollback is
    /// always available for the most recent `deployed` record").
    pub fn most_recent_deployed(&self) -> Option<DeploymentRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .find(|r| r.status == DeploymentStatus::Deployed)
            .cloned()
    }

    pub fn find(&self, id: &str) -> Option<DeploymentRecord> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Prunes in-memory and on-disk history down to the most recent
    /// `retention` records, rewriting the log file. Returns the number
    /// of records dropped.
    pub fn prune(&self, retention: usize, path: &str) -> anyhow::Result<usize> {
        let mut records = self.records.write();
        if records.len() <= retention {
            return Ok(0);
        }
        let dropped = records.len() - retention;
        let kept: Vec<DeploymentRecord> = records.split_off(dropped);
        *records = kept;

        let mut file = File::create(path)?;
        for r in records.iter() {
            writeln!(file, "{}", serde_json::to_string(r)?)?;
        }
        file.flush()?;

        // Re-open in append mode for subsequent writes.
        *self.file.lock() = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, status: DeploymentStatus) -> DeploymentRecord {
        DeploymentRecord {
            id: id.into(),
            timestamp: Utc::now(),
            actor: crate::models::DeploymentActor::Auto,
            changes: vec![],
            pre_snapshot_ref: "a".into(),
            post_snapshot_ref: "b".into(),
            validation_result: None,
            status,
            rolls_back: None,
        }
    }

    #[test]
    fn append_then_recent_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.log");
        let log = DeploymentAuditLog::open(path.to_str().unwrap()).unwrap();
        log.append(record("r1", DeploymentStatus::Deployed)).unwrap();
        log.append(record("r2", DeploymentStatus::Deployed)).unwrap();
        let recent = log.recent(10);
        assert_eq!(recent[0].id, "r2");
        assert_eq!(recent[1].id, "r1");
    }

    #[test]
    fn reload_reconstructs_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.log");
        {
            let log = DeploymentAuditLog::open(path.to_str().unwrap()).unwrap();
            log.append(record("r1", DeploymentStatus::Deployed)).unwrap();
        }
        let reopened = DeploymentAuditLog::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn most_recent_deployed_skips_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.log");
        let log = DeploymentAuditLog::open(path.to_str().unwrap()).unwrap();
        log.append(record("r1", DeploymentStatus::Deployed)).unwrap();
        log.append(record("r2", DeploymentStatus::Failed)).unwrap();
        assert_eq!(log.most_recent_deployed().unwrap().id, "r1");
    }

    #[test]
    fn prune_keeps_only_retention_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.log");
        let log = DeploymentAuditLog::open(path.to_str().unwrap()).unwrap();
        for i in 0..5 {
            log.append(record(&format!("r{i}"), DeploymentStatus::Deployed)).unwrap();
        }
        let dropped = log.prune(2, path.to_str().unwrap()).unwrap();
        assert_eq!(dropped, 3);
        assert_eq!(log.len(), 2);
        let reopened = DeploymentAuditLog::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.len(), 2);
    }
}
