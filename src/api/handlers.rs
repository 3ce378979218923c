//! API request handlers

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::models::{ApiError, GenerateRequest, GenerateResponse, JobStatusResponse, Suggestion};
use crate::flashcards::FlashcardSet;
use crate::jobs::controller::StatusReport;
use crate::jobs::JobController;
use crate::video::{JobKey, VideoId};

pub const SUGGESTION_LIMIT: usize = 10;

/// Handle health check requests
pub async fn health_check(controller: &JobController) -> Value {
    json!({
        "status": "healthy",
        "service": "flashcard-forge",
        "version": env!("CARGO_PKG_VERSION"),
        "runningJobs": controller.running_jobs().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })
}

fn key_for(video_id: &str, requester: &str) -> Result<JobKey, ApiError> {
    let video_id = VideoId::parse(video_id)?;
    Ok(JobKey::new(video_id, requester))
}

/// Accept a generation request
pub async fn generate(
    controller: &Arc<JobController>,
    requester: &str,
    request: GenerateRequest,
) -> Result<GenerateResponse, ApiError> {
    let raw = request.video_id.unwrap_or_default();
    let video_id = VideoId::parse(&raw)?;
    let handle = controller
        .submit_with_priority(video_id, requester, request.priority.unwrap_or(0))
        .await?;
    Ok(handle.into())
}

/// Report a job's progress
pub async fn job_status(controller: &JobController, requester: &str, video_id: &str) -> Result<JobStatusResponse, ApiError> {
    let key = key_for(video_id, requester)?;
    match controller.status(&key).await? {
        Some(StatusReport::Tracked(record)) => Ok(record.into()),
        Some(StatusReport::Finished) => Ok(JobStatusResponse::finished(key.video_id)),
        None => Err(ApiError::not_found("Job not found")),
    }
}

/// Cancel an active job
pub async fn cancel_job(controller: &JobController, requester: &str, video_id: &str) -> Result<Value, ApiError> {
    let key = key_for(video_id, requester)?;
    match controller.cancel(&key).await? {
        Some(record) => Ok(json!({
            "message": "Job cancelled",
            "jobId": record.job_id,
            "videoId": record.video_id,
        })),
        None => Err(ApiError::not_found("No active job for this video")),
    }
}

pub async fn get_flashcards(controller: &JobController, requester: &str, video_id: &str) -> Result<FlashcardSet, ApiError> {
    let key = key_for(video_id, requester)?;
    controller
        .result(&key)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))
}

/// Delete a flashcard set along with any job still tracked for it
pub async fn delete_flashcards(controller: &JobController, requester: &str, video_id: &str) -> Result<Value, ApiError> {
    let key = key_for(video_id, requester)?;
    if controller.delete_result(&key).await? {
        info!(video_id = %key.video_id, requester = %key.requester_id, "Flashcards deleted");
        Ok(json!({ "message": "Video deleted successfully" }))
    } else {
        Err(ApiError::not_found("Video not found"))
    }
}

pub async fn list_flashcards(controller: &JobController, requester: &str) -> Result<Vec<FlashcardSet>, ApiError> {
    Ok(controller.list_results(requester).await?)
}

fn required_query(query: Option<String>) -> Result<String, ApiError> {
    query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Search query is required"))
}

/// Title search over the requester's sets
pub async fn search_flashcards(
    controller: &JobController,
    requester: &str,
    query: Option<String>,
) -> Result<Vec<FlashcardSet>, ApiError> {
    let query = required_query(query)?;
    let matches = controller.search_results(requester, &query, None).await?;
    if matches.is_empty() {
        return Err(ApiError::not_found("No videos found matching your search"));
    }
    Ok(matches)
}

pub async fn suggestions(
    controller: &JobController,
    requester: &str,
    query: Option<String>,
) -> Result<Vec<Suggestion>, ApiError> {
    let query = required_query(query)?;
    let matches = controller
        .search_results(requester, &query, Some(SUGGESTION_LIMIT))
        .await?;
    Ok(matches.into_iter().map(Suggestion::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_required_query() {
        assert_eq!(required_query(Some("  rust ".to_string())).unwrap(), "rust");
        assert_eq!(required_query(Some("   ".to_string())).unwrap_err().status, StatusCode::BAD_REQUEST);
        assert_eq!(required_query(None).unwrap_err().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_key_for_rejects_bad_id() {
        let err = key_for("bad id!", "alice").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(key_for("dQw4w9WgXcQ", "alice").is_ok());
    }
}
