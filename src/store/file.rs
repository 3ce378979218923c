//! JSON-document stores on the local filesystem
//!
//! Each record lives in its own `<requester>__<video>.json` file. New records
//! are written to a temp file and hard-linked into place, which fails if the
//! target exists. Every read-modify-write of a Job Record holds a per-key
//! `.lock` file taken the same way, so the checks hold across all processes
//! sharing the directory. A lock older than [`LOCK_STALE_AFTER`] is taken to
//! be left by a crashed process and is broken.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{apply_claim, is_stalled, sort_batch, sort_newest_first, stall_cutoff, JobStore, ResultStore};
use crate::error::StoreError;
use crate::flashcards::FlashcardSet;
use crate::jobs::{JobRecord, JobStatus};
use crate::video::JobKey;

const LOCK_POLL: Duration = Duration::from_millis(5);
const LOCK_WAIT: Duration = Duration::from_secs(10);
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Exclusive hold on one key; release with [`DocumentDir::unlock`]
#[derive(Debug)]
#[must_use]
struct KeyLock {
    path: PathBuf,
}

/// A directory of JSON documents keyed by [`JobKey`]
#[derive(Debug)]
struct DocumentDir {
    dir: PathBuf,
}

impl DocumentDir {
    async fn open(dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn stem(key: &JobKey) -> String {
        let requester = urlencoding::encode(&key.requester_id).replace('.', "%2E");
        format!("{}__{}", requester, key.video_id)
    }

    fn path_for(&self, key: &JobKey) -> PathBuf {
        self.dir.join(format!("{}.json", Self::stem(key)))
    }

    fn lock_path(&self, key: &JobKey) -> PathBuf {
        self.dir.join(format!("{}.lock", Self::stem(key)))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!(".tmp-{}", Uuid::new_v4()))
    }

    /// Wait for exclusive access to `key` across processes
    async fn lock(&self, key: &JobKey) -> Result<KeyLock, StoreError> {
        let path = self.lock_path(key);
        let marker = self.temp_path();
        fs::write(&marker, std::process::id().to_string()).await?;
        let deadline = Instant::now() + LOCK_WAIT;

        let outcome = loop {
            match fs::hard_link(&marker, &path).await {
                Ok(()) => break Ok(KeyLock { path: path.clone() }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        warn!("Breaking abandoned lock {}", path.display());
                        if let Err(e) = self.discard(&path).await {
                            break Err(e);
                        }
                        continue;
                    }
                    if Instant::now() >= deadline {
                        break Err(StoreError::Unavailable(format!("Timed out waiting for lock on {}", key)));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => break Err(e.into()),
            }
        };

        let _ = fs::remove_file(&marker).await;
        outcome
    }

    async fn unlock(&self, lock: KeyLock) {
        if let Err(e) = fs::remove_file(&lock.path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not release lock {}: {}", lock.path.display(), e);
            }
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &JobKey) -> Result<Option<T>, StoreError> {
        read_document(&self.path_for(key)).await
    }

    async fn write_temp<T: Serialize>(&self, value: &T) -> Result<PathBuf, StoreError> {
        let temp = self.temp_path();
        let content = serde_json::to_string_pretty(value)?;
        fs::write(&temp, content).await?;
        Ok(temp)
    }

    /// Write only if no document exists for the key
    async fn create<T: Serialize>(&self, key: &JobKey, value: &T) -> Result<bool, StoreError> {
        let temp = self.write_temp(value).await?;
        let linked = fs::hard_link(&temp, self.path_for(key)).await;
        let _ = fs::remove_file(&temp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the document for the key
    async fn replace<T: Serialize>(&self, key: &JobKey, value: &T) -> Result<(), StoreError> {
        let temp = self.write_temp(value).await?;
        if let Err(e) = fs::rename(&temp, self.path_for(key)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &JobKey) -> Result<bool, StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a file aside before deleting it, so only one process removes it
    async fn discard(&self, path: &Path) -> Result<(), StoreError> {
        let aside = self.temp_path();
        match fs::rename(path, &aside).await {
            Ok(()) => {
                let _ = fs::remove_file(&aside).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut documents = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match read_document(&path).await {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        Ok(documents)
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    match fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(modified) => modified.elapsed().map_or(false, |age| age >= LOCK_STALE_AFTER),
        Err(_) => false,
    }
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Job Records as JSON files under `<data_dir>/jobs`
#[derive(Debug)]
pub struct FileJobStore {
    docs: DocumentDir,
}

impl FileJobStore {
    pub async fn new(dir: PathBuf) -> Result<Self, StoreError> {
        let docs = DocumentDir::open(dir).await?;
        info!("📁 Job store at {}", docs.dir.display());
        Ok(Self { docs })
    }

    async fn create_locked(&self, key: &JobKey, record: JobRecord) -> Result<JobRecord, StoreError> {
        if !self.docs.create(key, &record).await? {
            match self.docs.read::<JobRecord>(key).await? {
                Some(existing) if existing.is_active() => {
                    return Err(StoreError::Conflict(Box::new(existing)));
                }
                // terminal, or removed since the link failed
                _ => self.docs.replace(key, &record).await?,
            }
        }
        debug!("Created job {} for {}", record.job_id, key);
        Ok(record)
    }

    async fn update_locked(&self, key: &JobKey, record: &JobRecord) -> Result<(), StoreError> {
        match self.docs.read::<JobRecord>(key).await? {
            Some(stored) if stored.job_id == record.job_id && stored.is_active() => {
                self.docs.replace(key, record).await
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn claim_locked(&self, key: &JobKey, job_id: Uuid, worker: &str) -> Result<Option<JobRecord>, StoreError> {
        let Some(mut record) = self.docs.read::<JobRecord>(key).await? else {
            return Ok(None);
        };
        if !apply_claim(&mut record, job_id, worker) {
            return Ok(None);
        }
        self.docs.replace(key, &record).await?;
        Ok(Some(record))
    }

    async fn delete_locked(&self, key: &JobKey, only_active: bool) -> Result<Option<JobRecord>, StoreError> {
        match self.docs.read::<JobRecord>(key).await? {
            Some(record) if !only_active || record.is_active() => {
                self.docs.remove(key).await?;
                Ok(Some(record))
            }
            Some(_) => Ok(None),
            // unreadable leftovers are still removed by an unconditional delete
            None => {
                if !only_active {
                    self.docs.remove(key).await?;
                }
                Ok(None)
            }
        }
    }

    async fn fail_if_stalled_locked(
        &self,
        key: &JobKey,
        cutoff: chrono::DateTime<chrono::Utc>,
        reason: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        match self.docs.read::<JobRecord>(key).await? {
            Some(mut record) if is_stalled(&record, cutoff) => {
                record.mark_failed(reason);
                self.docs.replace(key, &record).await?;
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, record: JobRecord) -> Result<JobRecord, StoreError> {
        let key = record.key();
        let lock = self.docs.lock(&key).await?;
        let outcome = self.create_locked(&key, record).await;
        self.docs.unlock(lock).await;
        outcome
    }

    async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        self.docs.read(key).await
    }

    async fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        let key = record.key();
        let lock = self.docs.lock(&key).await?;
        let outcome = self.update_locked(&key, record).await;
        self.docs.unlock(lock).await;
        outcome
    }

    async fn claim(&self, key: &JobKey, job_id: Uuid, worker: &str) -> Result<Option<JobRecord>, StoreError> {
        let lock = self.docs.lock(key).await?;
        let outcome = self.claim_locked(key, job_id, worker).await;
        self.docs.unlock(lock).await;
        outcome
    }

    async fn delete(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let lock = self.docs.lock(key).await?;
        let outcome = self.delete_locked(key, false).await;
        self.docs.unlock(lock).await;
        outcome
    }

    async fn delete_if_active(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let lock = self.docs.lock(key).await?;
        let outcome = self.delete_locked(key, true).await;
        self.docs.unlock(lock).await;
        outcome
    }

    async fn find_stalled(&self, threshold: Duration) -> Result<Vec<JobRecord>, StoreError> {
        let cutoff = stall_cutoff(threshold);
        let records: Vec<JobRecord> = self.docs.read_all().await?;
        Ok(records.into_iter().filter(|r| is_stalled(r, cutoff)).collect())
    }

    async fn fail_stalled(&self, threshold: Duration, reason: &str) -> Result<Vec<JobRecord>, StoreError> {
        let cutoff = stall_cutoff(threshold);
        let candidates: Vec<JobRecord> = self.docs.read_all().await?;

        let mut failed = Vec::new();
        for candidate in candidates.into_iter().filter(|r| is_stalled(r, cutoff)) {
            // re-checked under the lock: the owner may have reported progress
            let key = candidate.key();
            let lock = self.docs.lock(&key).await?;
            let outcome = self.fail_if_stalled_locked(&key, cutoff, reason).await;
            self.docs.unlock(lock).await;
            if let Some(record) = outcome? {
                failed.push(record);
            }
        }
        Ok(failed)
    }

    async fn find_next_batch(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let mut queued: Vec<JobRecord> = self
            .docs
            .read_all::<JobRecord>()
            .await?
            .into_iter()
            .filter(|r| r.status == JobStatus::Queued)
            .collect();
        sort_batch(&mut queued);
        queued.truncate(limit);
        Ok(queued)
    }
}

/// Result Records as JSON files under `<data_dir>/results`
#[derive(Debug)]
pub struct FileResultStore {
    docs: DocumentDir,
}

impl FileResultStore {
    pub async fn new(dir: PathBuf) -> Result<Self, StoreError> {
        let docs = DocumentDir::open(dir).await?;
        info!("📁 Result store at {}", docs.dir.display());
        Ok(Self { docs })
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn insert(&self, set: FlashcardSet) -> Result<(), StoreError> {
        if self.docs.create(&set.key(), &set).await? {
            Ok(())
        } else {
            Err(StoreError::Duplicate)
        }
    }

    async fn get(&self, key: &JobKey) -> Result<Option<FlashcardSet>, StoreError> {
        self.docs.read(key).await
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, StoreError> {
        self.docs.remove(key).await
    }

    async fn list(&self, requester_id: &str) -> Result<Vec<FlashcardSet>, StoreError> {
        let mut sets: Vec<FlashcardSet> = self
            .docs
            .read_all::<FlashcardSet>()
            .await?
            .into_iter()
            .filter(|set| set.requester_id == requester_id)
            .collect();
        sort_newest_first(&mut sets);
        Ok(sets)
    }
}
