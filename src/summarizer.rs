//! Chunk summarization
//!
//! Input text is normalized (filler tokens dropped, whitespace collapsed,
//! length capped) before it reaches a [`Summarizer`]. Summaries are bounded
//! to a short length; [`truncate_summary`] is the deterministic fallback
//! used whenever a backend fails.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::{SummarizerBackend, SummarizerConfig};
use crate::llm::{create_llm, ChatMessage, LLM};

const ELLIPSIS: char = '…';

/// Reduces a block of text to a short synopsis
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Text clean-up applied before summarization
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    filler_words: Vec<String>,
    max_chars: usize,
}

impl TextNormalizer {
    pub fn new(filler_words: &[String], max_chars: usize) -> Self {
        Self {
            filler_words: filler_words.iter().map(|w| w.to_lowercase()).collect(),
            max_chars,
        }
    }

    pub fn from_config(config: &SummarizerConfig) -> Self {
        Self::new(&config.filler_words, config.max_input_chars)
    }

    /// Drop filler and bracketed sound tags, collapse whitespace, cap length
    pub fn normalize(&self, text: &str) -> String {
        let stripped = strip_bracketed(text);
        let mut out = String::with_capacity(stripped.len().min(self.max_chars + 16));
        let mut count = 0usize;

        for token in stripped.split_whitespace() {
            if self.is_filler(token) {
                continue;
            }
            let extra = token.chars().count() + usize::from(!out.is_empty());
            if count + extra > self.max_chars {
                break;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(token);
            count += extra;
        }

        out
    }

    fn is_filler(&self, token: &str) -> bool {
        if token == ">>" || token == "-" {
            return true;
        }
        let bare = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        !bare.is_empty() && self.filler_words.iter().any(|f| *f == bare)
    }
}

/// Remove `[Music]`-style annotations that captions interleave with speech
fn strip_bracketed(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '[' => depth += 1,
            ']' if depth > 0 => {
                depth -= 1;
                out.push(' ');
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Cut text to at most `max_chars` characters, preferring a word boundary
/// and marking the cut with an ellipsis.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    if max_chars == 0 {
        return String::new();
    }

    let budget = max_chars - 1;
    let head: String = collapsed.chars().take(budget).collect();
    let at_boundary = collapsed.chars().nth(budget) == Some(' ');
    let cut = match head.rfind(' ') {
        Some(pos) if pos > 0 && !at_boundary => &head[..pos],
        _ => head.as_str(),
    };

    let mut result = cut.trim_end_matches([',', ';', ':', ' ']).to_string();
    result.push(ELLIPSIS);
    result
}

/// Local summarizer: leading sentences of the chunk, bounded in length
pub struct ExtractiveSummarizer {
    max_chars: usize,
}

impl ExtractiveSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("Nothing to summarize"));
        }

        let mut summary = String::new();
        for sentence in text.split_inclusive(['.', '!', '?']) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let joined = if summary.is_empty() {
                sentence.to_string()
            } else {
                format!("{} {}", summary, sentence)
            };
            if joined.chars().count() > self.max_chars {
                break;
            }
            summary = joined;
        }

        if summary.is_empty() {
            summary = truncate_summary(text, self.max_chars);
        }

        Ok(summary)
    }

    fn name(&self) -> &'static str {
        "extractive"
    }
}

/// Summarizer backed by a chat-completion model
pub struct LlmSummarizer {
    llm: Box<dyn LLM>,
    max_chars: usize,
}

impl LlmSummarizer {
    pub fn new(llm: Box<dyn LLM>, max_chars: usize) -> Self {
        Self { llm, max_chars }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You write flashcards from video transcript excerpts. Reply with one plain sentence \
             of at most {} characters capturing the key point. No preamble, no quotes, no markdown.",
            self.max_chars
        )
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(format!("Transcript excerpt:\n\n{}", text)),
        ];

        let response = self.llm.chat(messages).await?;
        debug!(
            "Summary generated by {:?} (tokens: {:?})",
            self.llm.provider_type(),
            response.tokens_used
        );

        let summary = response
            .content
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'')
            .trim()
            .to_string();

        if summary.is_empty() {
            return Err(anyhow!("Empty summary from {:?}", self.llm.provider_type()));
        }

        Ok(summary)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Create the summarizer selected by configuration
pub fn create_summarizer(config: &SummarizerConfig) -> Result<Arc<dyn Summarizer>> {
    match config.backend {
        SummarizerBackend::Extractive => Ok(Arc::new(ExtractiveSummarizer::new(config.max_summary_chars))),
        SummarizerBackend::Llm => {
            let llm = create_llm(&config.llm)?;
            Ok(Arc::new(LlmSummarizer::new(llm, config.max_summary_chars)))
        }
    }
}
