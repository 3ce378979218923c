//! Periodic detection of stalled jobs

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::JobRecord;
use crate::config::SweeperConfig;
use crate::error::StoreError;
use crate::store::JobStore;

pub const STALLED_ERROR: &str = "Job stalled: no progress reported within the heartbeat threshold; please resubmit";

/// Fails processing jobs whose heartbeat went quiet, so the requester can
/// resubmit.
pub struct StallSweeper {
    jobs: Arc<dyn JobStore>,
    threshold: Duration,
    interval: Duration,
}

impl StallSweeper {
    pub fn new(jobs: Arc<dyn JobStore>, config: &SweeperConfig) -> Self {
        Self {
            jobs,
            threshold: config.stall_threshold(),
            interval: config.interval(),
        }
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Run a single sweep
    pub async fn sweep_once(&self) -> Result<Vec<JobRecord>, StoreError> {
        let failed = self.jobs.fail_stalled(self.threshold, STALLED_ERROR).await?;
        for record in &failed {
            warn!(
                job_id = %record.job_id,
                video_id = %record.video_id,
                worker = record.worker_id.as_deref().unwrap_or("unknown"),
                "Marked stalled job as failed"
            );
        }
        Ok(failed)
    }

    /// Sweep on an interval until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "🧹 Stall sweeper started (threshold {:?}, every {:?})",
            self.threshold, self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.sweep_once().await {
                    Ok(failed) if failed.is_empty() => debug!("No stalled jobs"),
                    Ok(failed) => info!("Failed {} stalled jobs", failed.len()),
                    Err(e) => warn!("Stall sweep failed: {}", e),
                },
            }
        }

        debug!("Stall sweeper stopped");
    }
}
