//! Transcript source backed by caption files on disk
//!
//! Looks for `<captions_dir>/<video_id>.srt` first. When only a plain
//! `<video_id>.txt` transcript exists, sentence offsets are estimated from
//! word counts and the transcript is flagged as synthetic.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{SrtParser, Transcript, TranscriptSegment, TranscriptSource};
use crate::error::SourceError;
use crate::video::VideoId;

/// Speaking rate used to estimate synthetic offsets
const WORDS_PER_SECOND: f64 = 2.5;

pub struct CaptionFileSource {
    captions_dir: PathBuf,
    allow_synthetic: bool,
}

impl CaptionFileSource {
    pub fn new(captions_dir: PathBuf, allow_synthetic: bool) -> Self {
        Self {
            captions_dir,
            allow_synthetic,
        }
    }

    fn path_for(&self, video_id: &VideoId, ext: &str) -> PathBuf {
        self.captions_dir.join(format!("{}.{}", video_id, ext))
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, SourceError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SourceError::TranscriptUnavailable(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Split plain text into sentences with estimated, contiguous offsets
pub fn synthesize_segments(text: &str) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0.0;

    for sentence in split_sentences(text) {
        let words = sentence.split_whitespace().count().max(1) as f64;
        let duration = words / WORDS_PER_SECOND;
        segments.push(TranscriptSegment::new(sentence, cursor, duration));
        cursor += duration;
    }

    segments
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        if word.ends_with(['.', '!', '?']) {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }

    sentences
}

#[async_trait]
impl TranscriptSource for CaptionFileSource {
    async fn fetch_transcript(&self, video_id: &VideoId) -> Result<Transcript, SourceError> {
        let srt_path = self.path_for(video_id, "srt");
        if let Some(content) = Self::read_optional(&srt_path).await? {
            debug!("Loading captions from {}", srt_path.display());
            let segments = SrtParser::parse_segments(&content)
                .map_err(|e| SourceError::TranscriptUnavailable(format!("{}: {}", srt_path.display(), e)))?;
            return Ok(Transcript::new(segments));
        }

        if self.allow_synthetic {
            let txt_path = self.path_for(video_id, "txt");
            if let Some(content) = Self::read_optional(&txt_path).await? {
                warn!(
                    video_id = %video_id,
                    "No timed captions, using synthetic offsets from {}",
                    txt_path.display()
                );
                return Ok(Transcript::synthetic(synthesize_segments(&content)));
            }
        }

        Err(SourceError::TranscriptUnavailable(format!(
            "No captions found for video {}",
            video_id
        )))
    }

    fn name(&self) -> &'static str {
        "captions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::TimingSource;
    use tempfile::TempDir;

    fn vid() -> VideoId {
        VideoId::parse("abcdefghijk").unwrap()
    }

    #[test]
    fn test_synthesized_offsets_are_contiguous() {
        let segments = synthesize_segments("One two three four five. Six seven! Eight");
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "One two three four five.");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].duration, 2.0);
        assert_eq!(segments[1].start, 2.0);
        assert_eq!(segments[2].text, "Eight");
    }

    #[tokio::test]
    async fn test_prefers_srt() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join("abcdefghijk.srt"),
            "1\n00:00:00,000 --> 00:00:02,000\nHello\n",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("abcdefghijk.txt"), "ignored").await.unwrap();

        let source = CaptionFileSource::new(dir.path().to_path_buf(), true);
        let transcript = source.fetch_transcript(&vid()).await.unwrap();
        assert_eq!(transcript.timing, TimingSource::Real);
        assert_eq!(transcript.segments.len(), 1);
    }

    #[tokio::test]
    async fn test_plain_text_is_flagged_synthetic() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("abcdefghijk.txt"), "Plain text only.").await.unwrap();

        let source = CaptionFileSource::new(dir.path().to_path_buf(), true);
        let transcript = source.fetch_transcript(&vid()).await.unwrap();
        assert_eq!(transcript.timing, TimingSource::Synthetic);

        let strict = CaptionFileSource::new(dir.path().to_path_buf(), false);
        assert!(matches!(
            strict.fetch_transcript(&vid()).await,
            Err(SourceError::TranscriptUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_captions() {
        let dir = TempDir::new().unwrap();
        let source = CaptionFileSource::new(dir.path().to_path_buf(), true);
        assert!(source.fetch_transcript(&vid()).await.is_err());
    }
}
