//! Video metadata lookup (title and thumbnail)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::MetadataConfig;
use crate::error::SourceError;
use crate::video::VideoId;

/// Descriptive metadata fetched once per job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub thumbnail: String,
}

/// Capability that describes a video
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch_metadata(&self, video_id: &VideoId) -> Result<VideoMetadata, SourceError>;
}

/// Looks videos up through YouTube's oEmbed endpoint
pub struct OEmbedProvider {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: String,
    thumbnail_url: Option<String>,
}

impl OEmbedProvider {
    pub fn new(config: &MetadataConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            endpoint: config.oembed_endpoint.clone(),
            client,
        })
    }

    fn request_url(&self, video_id: &VideoId) -> String {
        format!(
            "{}?url={}&format=json",
            self.endpoint,
            urlencoding::encode(&video_id.watch_url())
        )
    }
}

/// Default thumbnail location when the lookup omits one
pub fn default_thumbnail(video_id: &VideoId) -> String {
    format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id)
}

#[async_trait]
impl MetadataProvider for OEmbedProvider {
    async fn fetch_metadata(&self, video_id: &VideoId) -> Result<VideoMetadata, SourceError> {
        let url = self.request_url(video_id);
        debug!("Fetching video metadata from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::MetadataUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::MetadataUnavailable(format!(
                "Metadata lookup for {} returned {}",
                video_id,
                response.status()
            )));
        }

        let body: OEmbedResponse = response
            .json()
            .await
            .map_err(|e| SourceError::MetadataUnavailable(format!("Invalid metadata payload: {}", e)))?;

        Ok(VideoMetadata {
            title: body.title,
            thumbnail: body
                .thumbnail_url
                .unwrap_or_else(|| default_thumbnail(video_id)),
        })
    }
}

pub fn create_metadata_provider(config: &MetadataConfig) -> anyhow::Result<Arc<dyn MetadataProvider>> {
    Ok(Arc::new(OEmbedProvider::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_is_encoded() {
        let provider = OEmbedProvider::new(&MetadataConfig::default()).unwrap();
        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(
            provider.request_url(&id),
            "https://www.youtube.com/oembed?url=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3DdQw4w9WgXcQ&format=json"
        );
    }

    #[test]
    fn test_default_thumbnail() {
        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(default_thumbnail(&id), "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg");
    }
}
