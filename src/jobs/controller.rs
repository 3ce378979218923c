//! Drives Job Records through `queued -> processing -> completed | failed`

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{ChunkDescriptor, ChunkStatus, JobHandle, JobRecord};
use crate::config::{Config, PipelineConfig};
use crate::error::{PipelineError, StoreError, SubmitError};
use crate::flashcards::{FlashcardGenerator, FlashcardSet, SetMetadata};
use crate::metadata::{create_metadata_provider, MetadataProvider};
use crate::store::{create_stores, JobStore, ResultStore};
use crate::summarizer::{create_summarizer, Summarizer};
use crate::transcription::{create_transcript_source, Chunker, TimingSource, TranscriptSource};
use crate::video::{JobKey, VideoId};

/// Local handle on a pipeline task, used only to signal cancellation
struct RunningJob {
    job_id: Uuid,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// What a status poll can see for a key
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    /// A Job Record exists
    Tracked(JobRecord),
    /// No Job Record, but the flashcard set was saved
    Finished,
}

pub struct JobController {
    jobs: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
    metadata: Arc<dyn MetadataProvider>,
    transcripts: Arc<dyn TranscriptSource>,
    generator: FlashcardGenerator,
    chunker: Chunker,
    settings: PipelineConfig,
    running: Mutex<HashMap<JobKey, RunningJob>>,
    permits: Arc<Semaphore>,
}

impl JobController {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        results: Arc<dyn ResultStore>,
        metadata: Arc<dyn MetadataProvider>,
        transcripts: Arc<dyn TranscriptSource>,
        summarizer: Arc<dyn Summarizer>,
        config: &Config,
    ) -> Self {
        let settings = config.pipeline.clone();
        Self {
            jobs,
            results,
            metadata,
            transcripts,
            generator: FlashcardGenerator::new(summarizer, &config.summarizer, settings.summary_failure_policy),
            chunker: Chunker::new(settings.chunk_window()),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1))),
            settings,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Build stores and external capabilities from configuration
    pub async fn from_config(config: &Config) -> anyhow::Result<Arc<Self>> {
        let (jobs, results) = create_stores(&config.storage).await?;
        let metadata = create_metadata_provider(&config.metadata)?;
        let transcripts = create_transcript_source(&config.transcript)?;
        let summarizer = create_summarizer(&config.summarizer)?;

        info!(
            "Pipeline ready (transcripts: {}, summarizer: {})",
            transcripts.name(),
            summarizer.name()
        );

        Ok(Arc::new(Self::new(jobs, results, metadata, transcripts, summarizer, config)))
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn result_store(&self) -> &Arc<dyn ResultStore> {
        &self.results
    }

    /// Accept a generation request and start its pipeline in the background
    pub async fn submit(self: &Arc<Self>, video_id: VideoId, requester_id: &str) -> Result<JobHandle, SubmitError> {
        self.submit_with_priority(video_id, requester_id, 0).await
    }

    pub async fn submit_with_priority(
        self: &Arc<Self>,
        video_id: VideoId,
        requester_id: &str,
        priority: i32,
    ) -> Result<JobHandle, SubmitError> {
        let requester_id = requester_id.trim();
        if requester_id.is_empty() {
            return Err(SubmitError::Validation("Requester is required".to_string()));
        }

        let key = JobKey::new(video_id, requester_id);
        if self.results.exists(&key).await? {
            return Err(SubmitError::DuplicateResult { video_id: key.video_id });
        }

        let record = match self.jobs.create(JobRecord::queued(&key, priority)).await {
            Ok(record) => record,
            Err(StoreError::Conflict(existing)) => {
                debug!("Job {} already {} for {}", existing.job_id, existing.status, key);
                return Err(SubmitError::DuplicateJob(existing.handle()));
            }
            Err(e) => return Err(e.into()),
        };

        // another instance may have committed a result since the first check
        if self.results.exists(&key).await? {
            self.jobs.delete_if_active(&key).await?;
            return Err(SubmitError::DuplicateResult { video_id: key.video_id });
        }

        info!(job_id = %record.job_id, video_id = %key.video_id, requester = %key.requester_id, "Job accepted");
        let handle = record.handle();
        self.spawn(record).await;
        Ok(handle)
    }

    async fn spawn(self: &Arc<Self>, record: JobRecord) {
        let key = record.key();
        let job_id = record.job_id;
        let token = CancellationToken::new();

        let mut running = self.running.lock().await;
        let previous = running.insert(
            key.clone(),
            RunningJob {
                job_id,
                token: token.clone(),
                handle: None,
            },
        );
        // the older job's record is already gone or terminal
        if let Some(previous) = previous {
            debug!(job_id = %previous.job_id, "Stopping superseded pipeline for {}", key);
            previous.token.cancel();
        }

        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move { controller.run(record, token).await });

        if let Some(entry) = running.get_mut(&key).filter(|entry| entry.job_id == job_id) {
            entry.handle = Some(handle);
        }
    }

    #[instrument(skip(self, record, token), fields(job_id = %record.job_id, video_id = %record.video_id))]
    async fn run(self: Arc<Self>, mut record: JobRecord, token: CancellationToken) {
        let key = record.key();
        let job_id = record.job_id;

        let outcome = match cancellable(&token, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(_permit)) => self.execute(&mut record, &token).await,
            Ok(Err(_closed)) => Err(PipelineError::Cancelled),
            Err(cancelled) => Err(cancelled),
        };

        match outcome {
            Ok(()) => info!("✅ Job completed"),
            Err(PipelineError::Cancelled) => info!("Job cancelled"),
            Err(e) => {
                warn!("❌ Job failed: {}", e);
                record.mark_failed(e.to_string());
                match self.persist(&record).await {
                    Ok(()) | Err(PipelineError::Cancelled) => {}
                    Err(store_err) => error!(
                        "Could not record failure, job left in indeterminate state: {}",
                        store_err
                    ),
                }
            }
        }

        let mut running = self.running.lock().await;
        if running.get(&key).map_or(false, |entry| entry.job_id == job_id) {
            running.remove(&key);
        }
    }

    async fn execute(&self, record: &mut JobRecord, token: &CancellationToken) -> Result<(), PipelineError> {
        let key = record.key();

        let claimed = self
            .with_retry("claim job", || {
                self.jobs.claim(&key, record.job_id, &self.settings.instance_name)
            })
            .await?;
        // gone, or picked up by another instance
        let Some(claimed) = claimed else {
            return Err(PipelineError::Cancelled);
        };
        *record = claimed;

        let metadata = cancellable(token, self.metadata.fetch_metadata(&key.video_id)).await??;
        debug!("Metadata: {}", metadata.title);
        record.touch();
        self.persist(record).await?;

        let transcript = cancellable(token, self.transcripts.fetch_transcript(&key.video_id)).await??;
        let chunks = self.chunker.chunk(&transcript.segments);
        if chunks.is_empty() {
            return Err(PipelineError::NoTranscript);
        }
        if !chunks.iter().any(|chunk| self.generator.has_speech(chunk)) {
            return Err(PipelineError::NoSpeech);
        }
        info!(
            "Transcript has {} segments in {} chunks",
            transcript.segments.len(),
            chunks.len()
        );

        record.chunks = chunks.iter().map(ChunkDescriptor::pending).collect();
        record.touch();
        self.persist(record).await?;

        let interval = self.settings.progress_persist_interval();
        let mut last_persist = Instant::now();
        let mut flashcards = Vec::with_capacity(chunks.len());
        let mut failed_chunks = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            record.chunks[index].status = ChunkStatus::Processing;
            record.chunks[index].processing_attempts += 1;
            record.touch();
            if last_persist.elapsed() >= interval {
                self.persist(record).await?;
                last_persist = Instant::now();
            }

            let outcome = cancellable(token, self.generator.generate(index, chunk)).await?;

            let descriptor = &mut record.chunks[index];
            descriptor.transcription = Some(chunk.text.clone());
            match outcome.error() {
                Some(err) => {
                    descriptor.status = ChunkStatus::Failed;
                    descriptor.error = Some(err.reason.clone());
                    failed_chunks.push(index);
                }
                None => descriptor.status = ChunkStatus::Completed,
            }
            if let Some(card) = outcome.into_flashcard() {
                flashcards.push(card);
            }

            record.recompute_progress();
            record.touch();

            let is_last = index + 1 == chunks.len();
            if is_last || last_persist.elapsed() >= interval {
                self.persist(record).await?;
                last_persist = Instant::now();
                debug!(progress = record.progress, "Progress saved");
            }
        }

        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if flashcards.is_empty() {
            return Err(PipelineError::NoFlashcards {
                failed: failed_chunks.len(),
            });
        }

        let set = FlashcardSet {
            video_id: key.video_id.clone(),
            requester_id: key.requester_id.clone(),
            title: metadata.title,
            thumbnail: metadata.thumbnail,
            flashcards,
            metadata: SetMetadata {
                synthetic_timestamps: transcript.timing == TimingSource::Synthetic,
                failed_chunks,
            },
            created_at: Utc::now(),
        };
        self.commit(record, set).await
    }

    /// Save the result and complete the job. If the job vanished meanwhile
    /// the result is withdrawn.
    async fn commit(&self, record: &mut JobRecord, set: FlashcardSet) -> Result<(), PipelineError> {
        let key = record.key();
        let card_count = set.flashcards.len();

        self.with_retry("save flashcards", || self.results.insert(set.clone()))
            .await?;

        record.mark_completed();
        match self.persist(record).await {
            Ok(()) => {}
            Err(PipelineError::Cancelled) => {
                info!("Job removed during commit, withdrawing {} flashcards", card_count);
                if let Err(e) = self.with_retry("withdraw flashcards", || self.results.delete(&key)).await {
                    error!("Could not withdraw flashcards for cancelled job: {}", e);
                }
                return Err(PipelineError::Cancelled);
            }
            Err(e) => return Err(e),
        }

        info!(
            flashcards = card_count,
            duration_secs = record.processing_duration_secs().unwrap_or_default(),
            "Flashcards saved"
        );

        if !self.settings.retain_completed_jobs {
            if let Err(e) = self.jobs.delete(&key).await {
                warn!("Could not remove completed job record: {}", e);
            }
        }

        Ok(())
    }

    /// Write the record, mapping a vanished or replaced record to cancellation
    async fn persist(&self, record: &JobRecord) -> Result<(), PipelineError> {
        match self.with_retry("update job", || self.jobs.update(record)).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(PipelineError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.settings.store_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let backoff = self.settings.store_retry_backoff() * attempt;
                    warn!("{} failed (attempt {}/{}): {}", operation, attempt, attempts, e);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Remove a queued or processing job and stop its pipeline
    pub async fn cancel(&self, key: &JobKey) -> Result<Option<JobRecord>, StoreError> {
        let removed = self.jobs.delete_if_active(key).await?;
        if let Some(record) = &removed {
            self.signal_cancel(key, record.job_id).await;
            info!(job_id = %record.job_id, video_id = %key.video_id, "Job cancelled by requester");
        }
        Ok(removed)
    }

    async fn signal_cancel(&self, key: &JobKey, job_id: Uuid) {
        if let Some(entry) = self.running.lock().await.get(key) {
            if entry.job_id == job_id {
                entry.token.cancel();
            }
        }
    }

    pub async fn status(&self, key: &JobKey) -> Result<Option<StatusReport>, StoreError> {
        if let Some(record) = self.jobs.get(key).await? {
            return Ok(Some(StatusReport::Tracked(record)));
        }
        if self.results.exists(key).await? {
            return Ok(Some(StatusReport::Finished));
        }
        Ok(None)
    }

    pub async fn result(&self, key: &JobKey) -> Result<Option<FlashcardSet>, StoreError> {
        self.results.get(key).await
    }

    /// Delete a flashcard set and any job still tracked for the key.
    /// Returns whether anything was removed.
    pub async fn delete_result(&self, key: &JobKey) -> Result<bool, StoreError> {
        let job = self.jobs.delete(key).await?;
        if let Some(record) = &job {
            self.signal_cancel(key, record.job_id).await;
        }
        let removed = self.results.delete(key).await?;
        Ok(removed || job.is_some())
    }

    pub async fn list_results(&self, requester_id: &str) -> Result<Vec<FlashcardSet>, StoreError> {
        self.results.list(requester_id).await
    }

    pub async fn search_results(
        &self,
        requester_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<FlashcardSet>, StoreError> {
        self.results.search(requester_id, query, limit).await
    }

    /// Start pipelines for queued jobs not already running here, e.g. after
    /// a restart. Returns how many were started.
    pub async fn resume_queued(self: &Arc<Self>, limit: usize) -> Result<usize, StoreError> {
        let batch = self.jobs.find_next_batch(limit).await?;
        let mut started = 0;

        for record in batch {
            let key = record.key();
            if self.running.lock().await.contains_key(&key) {
                continue;
            }
            debug!(job_id = %record.job_id, "Resuming queued job");
            self.spawn(record).await;
            started += 1;
        }

        if started > 0 {
            info!("🔄 Resumed {} queued jobs", started);
        }
        Ok(started)
    }

    /// Wait for the local pipeline of `key`, if any, to finish
    pub async fn join(&self, key: &JobKey) {
        let handle = self
            .running
            .lock()
            .await
            .get_mut(key)
            .and_then(|entry| entry.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Pipeline task for {} panicked: {}", key, e);
            }
        }
    }

    /// Number of pipelines running in this process
    pub async fn running_jobs(&self) -> usize {
        self.running.lock().await.len()
    }
}

/// Race `future` against cancellation of `token`
async fn cancellable<F: Future>(token: &CancellationToken, future: F) -> Result<F::Output, PipelineError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        output = future => Ok(output),
    }
}
