//! Error types for the flashcard pipeline

use crate::jobs::JobHandle;
use crate::video::VideoId;

/// Errors surfaced synchronously by a generation request
#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),

    #[error("Flashcards for video {video_id} already exist for this user")]
    DuplicateResult { video_id: VideoId },

    #[error("A job for video {} is already {}", .0.video_id, .0.status)]
    DuplicateJob(JobHandle),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence failures
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    /// A non-terminal Job Record already holds the key
    #[error("An active job already exists for this video")]
    Conflict(Box<crate::jobs::JobRecord>),

    /// A Result Record already holds the key
    #[error("A flashcard set already exists for this video")]
    Duplicate,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Failures of the external video capabilities
#[derive(thiserror::Error, Debug, Clone)]
pub enum SourceError {
    #[error("Video metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Transcript unavailable: {0}")]
    TranscriptUnavailable(String),
}

/// Fatal pipeline failures, recorded into the Job Record's `error`
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Video metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Transcript unavailable: {0}")]
    TranscriptUnavailable(String),

    #[error("Transcript unavailable: no transcript segments for this video")]
    NoTranscript,

    #[error("Transcript unavailable: transcript contains no speech")]
    NoSpeech,

    #[error("No flashcards generated: all {failed} chunks failed to summarize")]
    NoFlashcards { failed: usize },

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    /// The Job Record was removed while the pipeline ran
    #[error("Job cancelled")]
    Cancelled,
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::MetadataUnavailable(msg) => PipelineError::MetadataUnavailable(msg),
            SourceError::TranscriptUnavailable(msg) => PipelineError::TranscriptUnavailable(msg),
        }
    }
}

/// Non-fatal failure of a single chunk
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Chunk {index} failed: {reason}")]
pub struct ChunkProcessingError {
    pub index: usize,
    pub reason: String,
}
