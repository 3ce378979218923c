//! Persistence for Job Records and Result Records
//!
//! Both collections are keyed by [`JobKey`]. The uniqueness of that key is
//! enforced by the store itself (atomic check-and-create), so it holds even
//! when several service instances share one backend.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StoreError;
use crate::flashcards::FlashcardSet;
use crate::jobs::{JobRecord, JobStatus};
use crate::video::JobKey;

pub use file::{FileJobStore, FileResultStore};
pub use memory::{MemoryJobStore, MemoryResultStore};

/// Job Record collection
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::Conflict`] carrying the
    /// existing record when a non-terminal job holds the key; a terminal
    /// record is replaced.
    async fn create(&self, record: JobRecord) -> Result<JobRecord, StoreError>;

    async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError>;

    /// Overwrite the stored record. Fails with [`StoreError::NotFound`] when
    /// the record was removed, replaced by another job, or already terminal.
    async fn update(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Move a queued job to `processing` on behalf of `worker`. Returns
    /// `None` when the job is gone or no longer queued.
    async fn claim(&self, key: &JobKey, job_id: Uuid, worker: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn delete(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError>;

    /// Remove the record only if it is queued or processing
    async fn delete_if_active(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError>;

    /// Processing jobs whose heartbeat is older than `threshold`
    async fn find_stalled(&self, threshold: Duration) -> Result<Vec<JobRecord>, StoreError>;

    /// Atomically fail every stalled job, returning the failed records
    async fn fail_stalled(&self, threshold: Duration, reason: &str) -> Result<Vec<JobRecord>, StoreError>;

    /// Queued jobs, highest priority first, then oldest first
    async fn find_next_batch(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError>;
}

/// Result Record collection
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] if the key is taken
    async fn insert(&self, set: FlashcardSet) -> Result<(), StoreError>;

    async fn get(&self, key: &JobKey) -> Result<Option<FlashcardSet>, StoreError>;

    async fn delete(&self, key: &JobKey) -> Result<bool, StoreError>;

    /// The requester's sets, newest first
    async fn list(&self, requester_id: &str) -> Result<Vec<FlashcardSet>, StoreError>;

    async fn exists(&self, key: &JobKey) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Case-insensitive title search over the requester's sets
    async fn search(
        &self,
        requester_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<FlashcardSet>, StoreError> {
        let needle = query.trim().to_lowercase();
        let matches = self
            .list(requester_id)
            .await?
            .into_iter()
            .filter(|set| set.title_matches(&needle));

        Ok(match limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }
}

/// Instant before which a processing job's heartbeat counts as stalled
pub(crate) fn stall_cutoff(threshold: Duration) -> DateTime<Utc> {
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(threshold)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn is_stalled(record: &JobRecord, cutoff: DateTime<Utc>) -> bool {
    if record.status != JobStatus::Processing {
        return false;
    }
    let last_seen = record
        .last_heartbeat
        .or(record.processing_started_at)
        .unwrap_or(record.updated_at);
    last_seen < cutoff
}

pub(crate) fn sort_batch(records: &mut [JobRecord]) {
    records.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
}

pub(crate) fn sort_newest_first(sets: &mut [FlashcardSet]) {
    sets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Apply the `queued -> processing` claim to a record in place
pub(crate) fn apply_claim(record: &mut JobRecord, job_id: Uuid, worker: &str) -> bool {
    if record.job_id != job_id || record.status != JobStatus::Queued {
        return false;
    }
    let now = Utc::now();
    record.status = JobStatus::Processing;
    record.worker_id = Some(worker.to_string());
    record.attempts += 1;
    record.processing_started_at = Some(now);
    record.touch();
    true
}

/// Build the configured pair of stores
pub async fn create_stores(config: &StorageConfig) -> anyhow::Result<(Arc<dyn JobStore>, Arc<dyn ResultStore>)> {
    match config.backend {
        StorageBackend::Memory => Ok((
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryResultStore::new()),
        )),
        StorageBackend::File => {
            let jobs = FileJobStore::new(config.data_dir.join("jobs")).await?;
            let results = FileResultStore::new(config.data_dir.join("results")).await?;
            Ok((Arc::new(jobs), Arc::new(results)))
        }
    }
}
