use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{TimingSource, Transcript, TranscriptSegment, TranscriptSource};
use crate::config::TranscriptConfig;
use crate::error::SourceError;
use crate::video::VideoId;

/// Client for a remote transcript service.
///
/// Issues `GET {endpoint}/{video_id}` and accepts either a bare JSON array
/// of `{text, start, duration}` segments or an object wrapping them.
pub struct HttpTranscriptSource {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TranscriptPayload {
    Segments(Vec<TranscriptSegment>),
    Wrapped {
        segments: Vec<TranscriptSegment>,
        #[serde(default)]
        synthetic: bool,
    },
}

impl HttpTranscriptSource {
    pub fn new(config: &TranscriptConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Transcript endpoint not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn url_for(&self, video_id: &VideoId) -> String {
        format!("{}/{}", self.endpoint, urlencoding::encode(video_id.as_str()))
    }
}

#[async_trait]
impl TranscriptSource for HttpTranscriptSource {
    async fn fetch_transcript(&self, video_id: &VideoId) -> Result<Transcript, SourceError> {
        let url = self.url_for(video_id);
        debug!("Requesting transcript from {}", url);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::TranscriptUnavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(SourceError::TranscriptUnavailable(format!(
                    "No transcript available for video {}",
                    video_id
                )))
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                return Err(SourceError::TranscriptUnavailable(format!(
                    "Transcript service error {}: {}",
                    status, text
                )));
            }
        }

        let payload: TranscriptPayload = response
            .json()
            .await
            .map_err(|e| SourceError::TranscriptUnavailable(format!("Invalid transcript payload: {}", e)))?;

        Ok(match payload {
            TranscriptPayload::Segments(segments) => Transcript::new(segments),
            TranscriptPayload::Wrapped { segments, synthetic } => Transcript {
                segments,
                timing: if synthetic {
                    TimingSource::Synthetic
                } else {
                    TimingSource::Real
                },
            },
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shapes() {
        let bare: TranscriptPayload =
            serde_json::from_str(r#"[{"text":"hi","start":0.0,"duration":1.5}]"#).unwrap();
        assert!(matches!(bare, TranscriptPayload::Segments(ref s) if s.len() == 1));

        let wrapped: TranscriptPayload = serde_json::from_str(
            r#"{"segments":[{"text":"hi","start":0,"duration":1}],"synthetic":true}"#,
        )
        .unwrap();
        assert!(matches!(wrapped, TranscriptPayload::Wrapped { synthetic: true, .. }));
    }

    #[test]
    fn test_requires_endpoint() {
        let config = TranscriptConfig::default();
        assert!(config.endpoint.is_none());
        assert!(HttpTranscriptSource::new(&config).is_err());
    }

    #[test]
    fn test_url_building() {
        let config = TranscriptConfig {
            endpoint: Some("http://localhost:9000/transcripts/".to_string()),
            ..TranscriptConfig::default()
        };
        let source = HttpTranscriptSource::new(&config).unwrap();
        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(source.url_for(&id), "http://localhost:9000/transcripts/dQw4w9WgXcQ");
    }
}
