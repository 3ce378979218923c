//! API module for Flashcard Forge
//!
//! REST endpoints for submitting videos, polling jobs and managing saved
//! flashcard sets. Callers are identified by the `x-requester-id` header.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::jobs::JobController;

pub mod handlers;
pub mod models;
pub mod server;

pub use server::{router, AppState};

/// API server handling REST requests
pub struct ApiServer {
    controller: Arc<JobController>,
    config: Arc<Config>,
}

impl ApiServer {
    pub fn new(controller: Arc<JobController>, config: Arc<Config>) -> Self {
        Self { controller, config }
    }

    /// Start the API server in the background
    pub fn start_background(self, shutdown: impl Future<Output = ()> + Send + 'static) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.start(shutdown).await })
    }

    /// Serve until `shutdown` resolves
    pub async fn start(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        info!("🚀 Starting API server on port {}", self.config.server.port);
        server::start_http_server(self.controller, self.config, shutdown).await
    }
}
