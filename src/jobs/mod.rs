//! Job Records and the controller that drives them

pub mod controller;
pub mod sweeper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::transcription::Chunk;
use crate::video::{JobKey, VideoId};

pub use controller::JobController;
pub use sweeper::StallSweeper;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, ChunkStatus::Completed | ChunkStatus::Failed)
    }
}

/// Per-chunk state inside a Job Record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub start_time: u64,
    pub end_time: u64,
    pub status: ChunkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub processing_attempts: u32,
}

impl ChunkDescriptor {
    pub fn pending(chunk: &Chunk) -> Self {
        Self {
            start_time: chunk.start_time_ms,
            end_time: chunk.end_time_ms,
            status: ChunkStatus::Pending,
            transcription: None,
            error: None,
            processing_attempts: 0,
        }
    }
}

/// Persisted coordination state for one (video, requester) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: Uuid,
    pub video_id: VideoId,
    pub requester_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default)]
    pub chunks: Vec<ChunkDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A freshly accepted job
    pub fn queued(key: &JobKey, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            video_id: key.video_id.clone(),
            requester_id: key.requester_id.clone(),
            status: JobStatus::Queued,
            progress: 0,
            chunks: Vec::new(),
            error: None,
            attempts: 0,
            priority,
            worker_id: None,
            created_at: now,
            updated_at: now,
            processing_started_at: None,
            processing_completed_at: None,
            last_heartbeat: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.video_id.clone(), self.requester_id.clone())
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            job_id: self.job_id,
            video_id: self.video_id.clone(),
            status: self.status,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Refresh `last_heartbeat` and `updated_at`
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_heartbeat = Some(now);
        self.updated_at = now;
    }

    /// Recompute progress from finished chunks. Never decreases, and stays
    /// below 100 until the job completes.
    pub fn recompute_progress(&mut self) {
        let total = self.chunks.len();
        if total == 0 {
            return;
        }
        let finished = self.chunks.iter().filter(|c| c.status.is_finished()).count();
        let pct = ((100 * finished) as f64 / total as f64).round() as u8;
        self.progress = self.progress.max(pct.min(99));
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.error = None;
        self.processing_completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.processing_completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn processing_duration_secs(&self) -> Option<i64> {
        match (self.processing_started_at, self.processing_completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// Identifiers a client needs to poll an accepted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: Uuid,
    pub video_id: VideoId,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_chunks(n: usize) -> JobRecord {
        let key = JobKey::new(VideoId::parse("dQw4w9WgXcQ").unwrap(), "alice");
        let mut record = JobRecord::queued(&key, 0);
        record.chunks = (0..n as u64)
            .map(|i| {
                ChunkDescriptor::pending(&Chunk {
                    text: String::new(),
                    start_time_ms: i * 1000,
                    end_time_ms: (i + 1) * 1000,
                })
            })
            .collect();
        record
    }

    #[test]
    fn test_progress_counts_finished_chunks() {
        let mut record = record_with_chunks(3);
        record.chunks[0].status = ChunkStatus::Completed;
        record.recompute_progress();
        assert_eq!(record.progress, 33);

        record.chunks[1].status = ChunkStatus::Failed;
        record.recompute_progress();
        assert_eq!(record.progress, 67);
    }

    #[test]
    fn test_progress_capped_until_completed() {
        let mut record = record_with_chunks(2);
        for chunk in &mut record.chunks {
            chunk.status = ChunkStatus::Completed;
        }
        record.recompute_progress();
        assert_eq!(record.progress, 99);

        record.mark_completed();
        assert_eq!(record.progress, 100);
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut record = record_with_chunks(4);
        record.progress = 50;
        record.recompute_progress();
        assert_eq!(record.progress, 50);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn test_mark_failed_records_error() {
        let mut record = record_with_chunks(1);
        record.processing_started_at = Some(Utc::now());
        record.mark_failed("Transcript unavailable");
        assert_eq!(record.error.as_deref(), Some("Transcript unavailable"));
        assert!(!record.is_active());
        assert!(record.processing_duration_secs().is_some());
    }
}
