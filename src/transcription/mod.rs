//! Transcript acquisition and chunking
//!
//! A [`TranscriptSource`] yields timed text segments for a video; the
//! [`Chunker`] groups them into bounded-duration blocks for summarization.

pub mod captions;
pub mod chunker;
pub mod http;
pub mod srt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{TranscriptConfig, TranscriptProvider};
use crate::error::SourceError;
use crate::video::VideoId;

pub use captions::CaptionFileSource;
pub use chunker::{Chunk, Chunker};
pub use http::HttpTranscriptSource;
pub use srt::{SrtCue, SrtParser};

/// One timed piece of transcript text; times are in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            text: text.into(),
            start,
            duration,
        }
    }

    /// Start offset clamped to a finite, non-negative value
    pub fn start_secs(&self) -> f64 {
        sanitize_secs(self.start)
    }

    /// End offset, never before the start
    pub fn end_secs(&self) -> f64 {
        self.start_secs() + sanitize_secs(self.duration)
    }
}

fn sanitize_secs(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Where segment offsets came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingSource {
    /// Offsets reported by the transcript provider
    #[default]
    Real,
    /// Offsets estimated from text position (degraded mode)
    Synthetic,
}

/// Full transcript of a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
    pub timing: TimingSource,
}

impl Transcript {
    pub fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            segments,
            timing: TimingSource::Real,
        }
    }

    pub fn synthetic(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            segments,
            timing: TimingSource::Synthetic,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// End of the last segment in milliseconds
    pub fn end_time_ms(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| secs_to_ms(s.end_secs()))
            .max()
            .unwrap_or(0)
    }
}

/// Convert seconds to whole milliseconds
pub fn secs_to_ms(secs: f64) -> u64 {
    (sanitize_secs(secs) * 1000.0).round() as u64
}

/// Capability that obtains a transcript for a video
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_transcript(&self, video_id: &VideoId) -> Result<Transcript, SourceError>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

/// Create the transcript source selected by configuration
pub fn create_transcript_source(config: &TranscriptConfig) -> anyhow::Result<Arc<dyn TranscriptSource>> {
    match config.provider {
        TranscriptProvider::Http => Ok(Arc::new(HttpTranscriptSource::new(config)?)),
        TranscriptProvider::Captions => Ok(Arc::new(CaptionFileSource::new(
            config.captions_dir.clone(),
            config.allow_synthetic_timing,
        ))),
    }
}
