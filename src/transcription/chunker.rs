use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{secs_to_ms, TranscriptSegment};

/// Default summarization window
pub const DEFAULT_CHUNK_WINDOW: Duration = Duration::from_secs(5 * 60);

/// A bounded-duration block of transcript text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub text: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
}

impl Chunk {
    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms - self.start_time_ms
    }
}

/// Groups consecutive transcript segments into windows of a target duration
#[derive(Debug, Clone)]
pub struct Chunker {
    window_ms: u64,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_WINDOW)
    }
}

impl Chunker {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: (window.as_millis() as u64).max(1),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Partition segments into chunks.
    ///
    /// A chunk closes once the span from its first segment's start to the
    /// current segment's end reaches the window. The trailing partial
    /// accumulation is always emitted. Segments are ordered by start time
    /// first, and each chunk's end is clamped to the next chunk's start so
    /// ranges never overlap when providers report overlapping cues.
    pub fn chunk(&self, segments: &[TranscriptSegment]) -> Vec<Chunk> {
        let mut ordered: Vec<&TranscriptSegment> = segments.iter().collect();
        ordered.sort_by(|a, b| a.start_secs().total_cmp(&b.start_secs()));

        let mut chunks = Vec::new();
        let mut texts: Vec<&str> = Vec::new();
        let mut chunk_start: Option<u64> = None;
        let mut chunk_end = 0u64;

        for segment in ordered {
            let start = secs_to_ms(segment.start_secs());
            let end = secs_to_ms(segment.end_secs());
            let first = *chunk_start.get_or_insert(start);

            let text = segment.text.trim();
            if !text.is_empty() {
                texts.push(text);
            }
            chunk_end = chunk_end.max(end);

            if chunk_end.saturating_sub(first) >= self.window_ms {
                chunks.push(Chunk {
                    text: texts.join(" "),
                    start_time_ms: first,
                    end_time_ms: chunk_end,
                });
                texts.clear();
                chunk_start = None;
                chunk_end = 0;
            }
        }

        if let Some(first) = chunk_start {
            chunks.push(Chunk {
                text: texts.join(" "),
                start_time_ms: first,
                end_time_ms: chunk_end.max(first),
            });
        }

        for i in 1..chunks.len() {
            let next_start = chunks[i].start_time_ms;
            let current = &mut chunks[i - 1];
            current.end_time_ms = current.end_time_ms.min(next_start).max(current.start_time_ms);
        }

        debug!(
            segments = segments.len(),
            chunks = chunks.len(),
            window_ms = self.window_ms,
            "Chunked transcript"
        );

        chunks
    }
}
