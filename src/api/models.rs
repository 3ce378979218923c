//! API data models

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::error::{StoreError, SubmitError};
use crate::flashcards::FlashcardSet;
use crate::jobs::{ChunkDescriptor, ChunkStatus, JobHandle, JobRecord, JobStatus};
use crate::video::VideoId;

/// Header carrying the authenticated requester
pub const REQUESTER_HEADER: &str = "x-requester-id";

/// Identity of the caller, set by the authentication layer in front of us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(REQUESTER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Requester(value.to_string()))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default, alias = "url", alias = "videoUrl")]
    pub video_id: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub job_id: Uuid,
    pub video_id: VideoId,
    pub status: JobStatus,
    pub message: String,
}

impl From<JobHandle> for GenerateResponse {
    fn from(handle: JobHandle) -> Self {
        Self {
            job_id: handle.job_id,
            video_id: handle.video_id,
            status: handle.status,
            message: "Flashcard generation started".to_string(),
        }
    }
}

/// Poll response for a job
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub video_id: VideoId,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    #[serde(default)]
    pub chunks: Vec<ChunkDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_duration_secs: Option<i64>,
}

impl JobStatusResponse {
    /// Job Record already removed after its result was saved
    pub fn finished(video_id: VideoId) -> Self {
        Self {
            job_id: None,
            video_id,
            status: JobStatus::Completed,
            progress: 100,
            error: None,
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            chunks: Vec::new(),
            attempts: None,
            created_at: None,
            processing_started_at: None,
            processing_completed_at: None,
            processing_duration_secs: None,
        }
    }
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        let count = |status: ChunkStatus| record.chunks.iter().filter(|c| c.status == status).count();
        let completed_chunks = count(ChunkStatus::Completed);
        let failed_chunks = count(ChunkStatus::Failed);
        let processing_duration_secs = record.processing_duration_secs();

        Self {
            job_id: Some(record.job_id),
            video_id: record.video_id,
            status: record.status,
            progress: record.progress,
            error: record.error,
            total_chunks: record.chunks.len(),
            completed_chunks,
            failed_chunks,
            chunks: record.chunks,
            attempts: Some(record.attempts),
            created_at: Some(record.created_at),
            processing_started_at: record.processing_started_at,
            processing_completed_at: record.processing_completed_at,
            processing_duration_secs,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: Option<String>,
}

/// Compact entry for search-as-you-type
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub video_id: VideoId,
    pub title: String,
    pub thumbnail: String,
}

impl From<FlashcardSet> for Suggestion {
    fn from(set: FlashcardSet) -> Self {
        Self {
            video_id: set.video_id,
            title: set.title,
            thumbnail: set.thumbnail,
        }
    }
}

/// Error response: a status code and a JSON body with an `error` field
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound => Self::not_found("Not found"),
            StoreError::Unavailable(msg) => {
                error!("Store unavailable: {}", msg);
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Storage is temporarily unavailable")
            }
            StoreError::Conflict(_) | StoreError::Duplicate => Self::new(StatusCode::CONFLICT, message),
            StoreError::Serialization(e) => {
                error!("Corrupt record: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let message = err.to_string();
        match err {
            SubmitError::Validation(msg) => Self::bad_request(msg),
            SubmitError::DuplicateResult { video_id } => Self {
                status: StatusCode::CONFLICT,
                body: json!({ "error": message, "videoId": video_id }),
            },
            SubmitError::DuplicateJob(handle) => Self {
                status: StatusCode::CONFLICT,
                body: json!({
                    "error": message,
                    "videoId": handle.video_id,
                    "jobId": handle.job_id,
                    "status": handle.status,
                }),
            },
            SubmitError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
