//! Job persistence.
//!
//! Jobs live in a concurrent map and are written to a JSON file after every
//! change, so a restart resumes from the last persisted transition.

use dashmap::DashMap;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::blockchain::types::TxStatus;
use crate::observability::metrics;
use crate::withdrawals::types::{JobStatus, WithdrawalJob};

/// Thread-safe job map with optional file persistence.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<DashMap<Uuid, WithdrawalJob>>,
    persistence_path: Option<PathBuf>,
    /// Serializes file writes so snapshots never interleave.
    write_lock: Arc<Mutex<()>>,
}

impl JobStore {
    /// Create an empty store.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// An in-memory store.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Load from file if it exists.
    pub fn load_from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let store = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let map: HashMap<Uuid, WithdrawalJob> = serde_json::from_reader(reader)?;
            for (id, job) in map {
                store.inner.insert(id, job);
            }
            metrics::record_job_count(store.inner.len());
            tracing::info!(
                path = %path.display(),
                jobs = store.inner.len(),
                "Loaded withdrawal jobs"
            );
        }
        Ok(store)
    }

    /// Insert or replace a job, then persist.
    pub fn put(&self, job: &WithdrawalJob) -> std::io::Result<()> {
        self.inner.insert(job.id, job.clone());
        metrics::record_job_count(self.inner.len());
        self.save_to_file()
    }

    pub fn get(&self, id: &Uuid) -> Option<WithdrawalJob> {
        self.inner.get(id).map(|r| r.value().clone())
    }

    pub fn list(&self) -> Vec<WithdrawalJob> {
        self.inner.iter().map(|r| r.value().clone()).collect()
    }

    /// In-progress jobs with a leg on chain whose record is still PENDING.
    ///
    /// Jobs waiting on an operator are left alone.
    pub fn list_resumable(&self) -> Vec<WithdrawalJob> {
        self.inner
            .iter()
            .filter(|r| {
                let job = r.value();
                job.overall_status == JobStatus::InProgress
                    && job
                        .submitted_leg()
                        .and_then(|leg| job.record(leg))
                        .map(|record| record.status() == TxStatus::Pending)
                        .unwrap_or(false)
            })
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Write a snapshot: temp file, then rename over the target.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let map: HashMap<Uuid, WithdrawalJob> = self
            .inner
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();

        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &map)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), jobs = map.len(), "Saved withdrawal jobs");
        Ok(())
    }
}
