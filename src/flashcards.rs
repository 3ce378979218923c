//! Flashcards and the finished flashcard set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{SummarizerConfig, SummaryFailurePolicy};
use crate::error::ChunkProcessingError;
use crate::summarizer::{truncate_summary, Summarizer, TextNormalizer};
use crate::transcription::Chunk;
use crate::video::{JobKey, VideoId};

/// A summary tied to a time range of the video (milliseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub content: String,
    pub start_time: u64,
    pub end_time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetMetadata {
    /// Offsets were estimated from an untimed transcript
    #[serde(default)]
    pub synthetic_timestamps: bool,

    /// Indices of chunks whose summarization failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<usize>,
}

/// The Result Record for one (video, requester) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardSet {
    pub video_id: VideoId,
    pub requester_id: String,
    pub title: String,
    pub thumbnail: String,
    pub flashcards: Vec<Flashcard>,
    #[serde(default)]
    pub metadata: SetMetadata,
    pub created_at: DateTime<Utc>,
}

impl FlashcardSet {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.video_id.clone(), self.requester_id.clone())
    }

    /// Case-insensitive title match; `needle` must already be lowercase
    pub fn title_matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
    }
}

/// Result of turning one chunk into a flashcard
#[derive(Debug, Clone, PartialEq)]
pub enum CardOutcome {
    Summarized(Flashcard),
    /// Summarization failed; the card carries truncated chunk text
    Fallback {
        flashcard: Flashcard,
        error: ChunkProcessingError,
    },
    Failed(ChunkProcessingError),
}

impl CardOutcome {
    pub fn flashcard(&self) -> Option<&Flashcard> {
        match self {
            CardOutcome::Summarized(card) | CardOutcome::Fallback { flashcard: card, .. } => Some(card),
            CardOutcome::Failed(_) => None,
        }
    }

    pub fn into_flashcard(self) -> Option<Flashcard> {
        match self {
            CardOutcome::Summarized(card) | CardOutcome::Fallback { flashcard: card, .. } => Some(card),
            CardOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ChunkProcessingError> {
        match self {
            CardOutcome::Summarized(_) => None,
            CardOutcome::Fallback { error, .. } | CardOutcome::Failed(error) => Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CardOutcome::Summarized(_))
    }
}

/// Turns chunks into flashcards through a [`Summarizer`]
pub struct FlashcardGenerator {
    summarizer: Arc<dyn Summarizer>,
    normalizer: TextNormalizer,
    max_summary_chars: usize,
    policy: SummaryFailurePolicy,
}

impl FlashcardGenerator {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        config: &SummarizerConfig,
        policy: SummaryFailurePolicy,
    ) -> Self {
        Self {
            summarizer,
            normalizer: TextNormalizer::from_config(config),
            max_summary_chars: config.max_summary_chars,
            policy,
        }
    }

    pub fn policy(&self) -> SummaryFailurePolicy {
        self.policy
    }

    /// Whether anything is left of the chunk once tags and fillers are stripped
    pub fn has_speech(&self, chunk: &Chunk) -> bool {
        !self.normalizer.normalize(&chunk.text).is_empty()
    }

    pub async fn generate(&self, index: usize, chunk: &Chunk) -> CardOutcome {
        let text = self.normalizer.normalize(&chunk.text);
        if text.is_empty() {
            return CardOutcome::Failed(ChunkProcessingError {
                index,
                reason: "Chunk has no speech after normalization".to_string(),
            });
        }

        let card = |content: String| Flashcard {
            content,
            start_time: chunk.start_time_ms,
            end_time: chunk.end_time_ms,
        };

        match self.summarizer.summarize(&text).await {
            Ok(summary) if !summary.trim().is_empty() => {
                debug!(chunk = index, summarizer = self.summarizer.name(), "Chunk summarized");
                CardOutcome::Summarized(card(truncate_summary(&summary, self.max_summary_chars)))
            }
            result => {
                let reason = match result {
                    Ok(_) => "Summarizer returned an empty summary".to_string(),
                    Err(e) => format!("Summarization failed: {}", e),
                };
                warn!(chunk = index, "{}", reason);
                let error = ChunkProcessingError { index, reason };

                match self.policy {
                    SummaryFailurePolicy::Fallback => CardOutcome::Fallback {
                        flashcard: card(truncate_summary(&text, self.max_summary_chars)),
                        error,
                    },
                    SummaryFailurePolicy::Skip => CardOutcome::Failed(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Summarizer for Echo {
        async fn summarize(&self, text: &str) -> anyhow::Result<String> {
            Ok(format!("Summary of: {}", text))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    struct Broken;

    #[async_trait]
    impl Summarizer for Broken {
        async fn summarize(&self, _text: &str) -> anyhow::Result<String> {
            Err(anyhow!("model offline"))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            start_time_ms: 1_000,
            end_time_ms: 301_000,
        }
    }

    fn generator(summarizer: Arc<dyn Summarizer>, policy: SummaryFailurePolicy) -> FlashcardGenerator {
        FlashcardGenerator::new(summarizer, &SummarizerConfig::default(), policy)
    }

    #[tokio::test]
    async fn test_summary_carries_chunk_times() {
        let outcome = generator(Arc::new(Echo), SummaryFailurePolicy::Fallback)
            .generate(0, &chunk("um pattern matching"))
            .await;

        assert!(outcome.is_success());
        let card = outcome.flashcard().unwrap();
        assert_eq!(card.content, "Summary of: pattern matching");
        assert_eq!((card.start_time, card.end_time), (1_000, 301_000));
    }

    #[tokio::test]
    async fn test_summary_is_bounded() {
        let outcome = generator(Arc::new(Echo), SummaryFailurePolicy::Fallback)
            .generate(0, &chunk(&"lifetimes ".repeat(50)))
            .await;
        assert!(outcome.flashcard().unwrap().content.chars().count() <= 120);
    }

    #[tokio::test]
    async fn test_fallback_policy_keeps_truncated_card() {
        let outcome = generator(Arc::new(Broken), SummaryFailurePolicy::Fallback)
            .generate(1, &chunk("Closures capture their environment."))
            .await;

        match outcome {
            CardOutcome::Fallback { flashcard, error } => {
                assert_eq!(flashcard.content, "Closures capture their environment.");
                assert_eq!(error.index, 1);
                assert!(error.reason.contains("model offline"));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_skip_policy_drops_card() {
        let outcome = generator(Arc::new(Broken), SummaryFailurePolicy::Skip)
            .generate(2, &chunk("Iterators are lazy."))
            .await;
        assert!(outcome.flashcard().is_none());
        assert_eq!(outcome.error().unwrap().index, 2);
    }

    #[tokio::test]
    async fn test_empty_chunk_fails() {
        let outcome = generator(Arc::new(Echo), SummaryFailurePolicy::Fallback)
            .generate(0, &chunk("[Music] um uh"))
            .await;
        assert!(matches!(outcome, CardOutcome::Failed(_)));
    }

    #[test]
    fn test_title_matches_case_insensitive() {
        let set = FlashcardSet {
            video_id: VideoId::parse("dQw4w9WgXcQ").unwrap(),
            requester_id: "alice".to_string(),
            title: "Rust Ownership Explained".to_string(),
            thumbnail: String::new(),
            flashcards: vec![],
            metadata: SetMetadata::default(),
            created_at: Utc::now(),
        };
        assert!(set.title_matches("ownership"));
        assert!(!set.title_matches("python"));
    }
}
