#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use flashcard_forge::config::StorageBackend;
use flashcard_forge::store::{MemoryJobStore, MemoryResultStore};
use flashcard_forge::{
    Config, ConfigBuilder, JobController, JobKey, JobRecord, JobStatus, JobStore, MetadataProvider, ResultStore,
    SourceError, StoreError, Summarizer, Transcript, TranscriptSegment, TranscriptSource, VideoId, VideoMetadata,
};

pub const VIDEO: &str = "dQw4w9WgXcQ";
pub const OTHER_VIDEO: &str = "9bZkp7q5f0w";

pub fn video(id: &str) -> VideoId {
    VideoId::parse(id).unwrap()
}

pub fn key(id: &str, requester: &str) -> JobKey {
    JobKey::new(video(id), requester)
}

/// `minutes` of speech as back-to-back segments of `segment_secs`
pub fn segments_for(minutes: u64, segment_secs: u64) -> Vec<TranscriptSegment> {
    (0..minutes * 60 / segment_secs)
        .map(|i| {
            TranscriptSegment::new(
                format!("Sentence number {} about ownership.", i),
                (i * segment_secs) as f64,
                segment_secs as f64,
            )
        })
        .collect()
}

/// Config tuned for tests: memory stores, no write throttling, fast retries
pub fn test_config() -> Config {
    ConfigBuilder::new()
        .with_storage(StorageBackend::Memory, "unused".into())
        .with_progress_interval(Duration::ZERO)
        .with_store_retries(3, Duration::from_millis(1))
        .build()
}

pub struct StaticMetadata {
    pub title: String,
}

impl StaticMetadata {
    pub fn titled(title: &str) -> Arc<Self> {
        Arc::new(Self { title: title.to_string() })
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadata {
    async fn fetch_metadata(&self, video_id: &VideoId) -> Result<VideoMetadata, SourceError> {
        Ok(VideoMetadata {
            title: self.title.clone(),
            thumbnail: format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id),
        })
    }
}

pub struct MissingMetadata;

#[async_trait]
impl MetadataProvider for MissingMetadata {
    async fn fetch_metadata(&self, _video_id: &VideoId) -> Result<VideoMetadata, SourceError> {
        Err(SourceError::MetadataUnavailable("video is private".to_string()))
    }
}

/// Serves a fixed transcript per video; unknown videos are unavailable
#[derive(Default)]
pub struct ScriptedTranscripts {
    transcripts: HashMap<String, Transcript>,
}

impl ScriptedTranscripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, transcript: Transcript) -> Self {
        self.transcripts.insert(id.to_string(), transcript);
        self
    }
}

#[async_trait]
impl TranscriptSource for ScriptedTranscripts {
    async fn fetch_transcript(&self, video_id: &VideoId) -> Result<Transcript, SourceError> {
        self.transcripts
            .get(video_id.as_str())
            .cloned()
            .ok_or_else(|| SourceError::TranscriptUnavailable(format!("no captions for {}", video_id)))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Summarizes by prefixing; fails for any text containing `fail_marker`
pub struct MarkerSummarizer {
    pub fail_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl MarkerSummarizer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail_marker: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing_on(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_marker: Some(marker.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Summarizer for MarkerSummarizer {
    async fn summarize(&self, text: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(anyhow!("summarizer rejected chunk"));
            }
        }
        Ok(format!("Key point: {}", text.chars().take(40).collect::<String>()))
    }

    fn name(&self) -> &'static str {
        "marker"
    }
}

/// Answers the first call immediately, then blocks every later call until
/// released. `entered` fires when a blocked call starts.
pub struct GatedSummarizer {
    pub calls: AtomicUsize,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedSummarizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl Summarizer for GatedSummarizer {
    async fn summarize(&self, _text: &str) -> anyhow::Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok("gated summary".to_string())
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Delegating job store that logs every write and can inject faults
pub struct InstrumentedJobStore {
    pub inner: MemoryJobStore,
    pub updates: Mutex<Vec<(JobStatus, u8)>>,
    /// Transient failures to return before updates succeed
    pub transient_failures: AtomicUsize,
    /// Delete the record instead of storing a `completed` update
    pub vanish_on_complete: bool,
}

impl InstrumentedJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_faults(0, false))
    }

    pub fn with_faults(transient_failures: usize, vanish_on_complete: bool) -> Self {
        Self {
            inner: MemoryJobStore::new(),
            updates: Mutex::new(Vec::new()),
            transient_failures: AtomicUsize::new(transient_failures),
            vanish_on_complete,
        }
    }

    pub fn recorded(&self) -> Vec<(JobStatus, u8)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for InstrumentedJobStore {
    async fn create(&self, record: JobRecord) -> Result<JobRecord, StoreError> {
        self.inner.create(record).await
    }

    async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get(key).await
    }

    async fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        if self.vanish_on_complete && record.status == JobStatus::Completed {
            self.inner.delete(&record.key()).await?;
            return Err(StoreError::NotFound);
        }
        self.inner.update(record).await?;
        self.updates.lock().unwrap().push((record.status, record.progress));
        Ok(())
    }

    async fn claim(&self, key: &JobKey, job_id: Uuid, worker: &str) -> Result<Option<JobRecord>, StoreError> {
        self.inner.claim(key, job_id, worker).await
    }

    async fn delete(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        self.inner.delete(key).await
    }

    async fn delete_if_active(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        self.inner.delete_if_active(key).await
    }

    async fn find_stalled(&self, threshold: Duration) -> Result<Vec<JobRecord>, StoreError> {
        self.inner.find_stalled(threshold).await
    }

    async fn fail_stalled(&self, threshold: Duration, reason: &str) -> Result<Vec<JobRecord>, StoreError> {
        self.inner.fail_stalled(threshold, reason).await
    }

    async fn find_next_batch(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        self.inner.find_next_batch(limit).await
    }
}

/// Everything a pipeline test needs to inspect afterwards
pub struct Harness {
    pub controller: Arc<JobController>,
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn ResultStore>,
}

pub fn harness_with(
    config: &Config,
    jobs: Arc<dyn JobStore>,
    transcripts: Arc<dyn TranscriptSource>,
    metadata: Arc<dyn MetadataProvider>,
    summarizer: Arc<dyn Summarizer>,
) -> Harness {
    let results: Arc<dyn ResultStore> = Arc::new(MemoryResultStore::new());
    let controller = Arc::new(JobController::new(
        Arc::clone(&jobs),
        Arc::clone(&results),
        metadata,
        transcripts,
        summarizer,
        config,
    ));
    Harness {
        controller,
        jobs,
        results,
    }
}

/// Memory stores, one 12-minute transcript for [`VIDEO`], healthy summarizer
pub fn harness() -> Harness {
    let transcripts = ScriptedTranscripts::new().with(VIDEO, Transcript::new(segments_for(12, 10)));
    harness_with(
        &test_config(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(transcripts),
        StaticMetadata::titled("Rust Ownership Explained"),
        MarkerSummarizer::ok(),
    )
}

/// Like [`harness`], but the second chunk of every job blocks until released
pub fn gated_harness() -> (Harness, Arc<GatedSummarizer>) {
    let summarizer = GatedSummarizer::new();
    let transcripts = ScriptedTranscripts::new().with(VIDEO, Transcript::new(segments_for(12, 10)));
    let h = harness_with(
        &test_config(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(transcripts),
        StaticMetadata::titled("Rust Ownership Explained"),
        summarizer.clone(),
    );
    (h, summarizer)
}
