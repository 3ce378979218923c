//! Video identifiers and the compound record key

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

use crate::error::SubmitError;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"))
}

/// A validated YouTube video identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    /// Parse a bare 11-character id or a YouTube URL carrying one.
    pub fn parse(input: &str) -> Result<Self, SubmitError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SubmitError::Validation("Video ID is required".to_string()));
        }

        if id_pattern().is_match(trimmed) {
            return Ok(Self(trimmed.to_string()));
        }

        let candidate = Self::extract_from_url(trimmed).ok_or_else(|| {
            SubmitError::Validation(format!("Not a valid YouTube video ID or URL: {}", trimmed))
        })?;

        if id_pattern().is_match(&candidate) {
            Ok(Self(candidate))
        } else {
            Err(SubmitError::Validation(format!(
                "Malformed YouTube video ID: {}",
                candidate
            )))
        }
    }

    fn extract_from_url(input: &str) -> Option<String> {
        let with_scheme = if input.starts_with("http://") || input.starts_with("https://") {
            input.to_string()
        } else {
            format!("https://{}", input)
        };
        let url = Url::parse(&with_scheme).ok()?;
        let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

        match host {
            "youtu.be" => url.path_segments()?.next().map(str::to_string),
            "youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
                let mut segments = url.path_segments()?;
                match segments.next()? {
                    "watch" => url
                        .query_pairs()
                        .find(|(k, _)| k == "v")
                        .map(|(_, v)| v.into_owned()),
                    "shorts" | "embed" | "live" | "v" => segments.next().map(str::to_string),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL for this video
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VideoId {
    type Error = SubmitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VideoId> for String {
    fn from(id: VideoId) -> Self {
        id.0
    }
}

/// Compound identity shared by Job Records and Result Records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKey {
    pub video_id: VideoId,
    pub requester_id: String,
}

impl JobKey {
    pub fn new(video_id: VideoId, requester_id: impl Into<String>) -> Self {
        Self {
            video_id,
            requester_id: requester_id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.requester_id, self.video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_id() {
        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_url_forms() {
        let forms = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
        ];
        for form in forms {
            assert_eq!(VideoId::parse(form).unwrap().as_str(), "dQw4w9WgXcQ", "{}", form);
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(VideoId::parse("").is_err());
        assert!(VideoId::parse("   ").is_err());
        assert!(VideoId::parse("short").is_err());
        assert!(VideoId::parse("https://vimeo.com/12345678901").is_err());
        assert!(VideoId::parse("https://www.youtube.com/watch?v=bad").is_err());
        assert!(VideoId::parse("dQw4w9WgXc!").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<VideoId, _> = serde_json::from_str("\"dQw4w9WgXcQ\"");
        assert!(ok.is_ok());
        let bad: Result<VideoId, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
