/// Flashcard Forge
///
/// Turns YouTube videos into time-stamped flashcards: the transcript is
/// fetched, cut into fixed windows, and each window summarized. Jobs run in
/// the background and are tracked through persisted Job Records that
/// clients poll.

pub mod api;
pub mod config;
pub mod error;
pub mod flashcards;
pub mod jobs;
pub mod llm;
pub mod metadata;
pub mod store;
pub mod summarizer;
pub mod transcription;
pub mod video;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder, SummaryFailurePolicy};
pub use crate::error::{PipelineError, SourceError, StoreError, SubmitError};
pub use crate::flashcards::{Flashcard, FlashcardGenerator, FlashcardSet};
pub use crate::jobs::{JobController, JobHandle, JobRecord, JobStatus, StallSweeper};
pub use crate::metadata::{MetadataProvider, VideoMetadata};
pub use crate::store::{JobStore, ResultStore};
pub use crate::summarizer::Summarizer;
pub use crate::transcription::{Chunk, Chunker, Transcript, TranscriptSegment, TranscriptSource};
pub use crate::video::{JobKey, VideoId};
