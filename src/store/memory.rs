//! In-process stores. Check-and-create happens under a single write lock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{apply_claim, is_stalled, sort_batch, sort_newest_first, stall_cutoff, JobStore, ResultStore};
use crate::error::StoreError;
use crate::flashcards::FlashcardSet;
use crate::jobs::{JobRecord, JobStatus};
use crate::video::JobKey;

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobKey, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: JobRecord) -> Result<JobRecord, StoreError> {
        let mut records = self.records.write().await;
        let key = record.key();
        if let Some(existing) = records.get(&key) {
            if existing.is_active() {
                return Err(StoreError::Conflict(Box::new(existing.clone())));
            }
        }
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.key()) {
            Some(stored) if stored.job_id == record.job_id && stored.is_active() => {
                *stored = record.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn claim(&self, key: &JobKey, job_id: Uuid, worker: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(key) {
            if apply_claim(record, job_id, worker) {
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }

    async fn delete(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.write().await.remove(key))
    }

    async fn delete_if_active(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let mut records = self.records.write().await;
        match records.get(key) {
            Some(record) if record.is_active() => Ok(records.remove(key)),
            _ => Ok(None),
        }
    }

    async fn find_stalled(&self, threshold: Duration) -> Result<Vec<JobRecord>, StoreError> {
        let cutoff = stall_cutoff(threshold);
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| is_stalled(record, cutoff))
            .cloned()
            .collect())
    }

    async fn fail_stalled(&self, threshold: Duration, reason: &str) -> Result<Vec<JobRecord>, StoreError> {
        let cutoff = stall_cutoff(threshold);
        let mut records = self.records.write().await;
        let mut failed = Vec::new();
        for record in records.values_mut().filter(|record| is_stalled(record, cutoff)) {
            record.mark_failed(reason);
            failed.push(record.clone());
        }
        Ok(failed)
    }

    async fn find_next_batch(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let mut queued: Vec<JobRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.status == JobStatus::Queued)
            .cloned()
            .collect();
        sort_batch(&mut queued);
        queued.truncate(limit);
        Ok(queued)
    }
}

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    sets: RwLock<HashMap<JobKey, FlashcardSet>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert(&self, set: FlashcardSet) -> Result<(), StoreError> {
        let mut sets = self.sets.write().await;
        let key = set.key();
        if sets.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }
        sets.insert(key, set);
        Ok(())
    }

    async fn get(&self, key: &JobKey) -> Result<Option<FlashcardSet>, StoreError> {
        Ok(self.sets.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, StoreError> {
        Ok(self.sets.write().await.remove(key).is_some())
    }

    async fn list(&self, requester_id: &str) -> Result<Vec<FlashcardSet>, StoreError> {
        let mut sets: Vec<FlashcardSet> = self
            .sets
            .read()
            .await
            .values()
            .filter(|set| set.requester_id == requester_id)
            .cloned()
            .collect();
        sort_newest_first(&mut sets);
        Ok(sets)
    }
}
