use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flashcard_forge::api::ApiServer;
use flashcard_forge::{Config, JobController, StallSweeper};

/// Queued jobs picked up per startup batch
const RESUME_BATCH: usize = 100;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("Flashcard Forge")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Generate flashcards from YouTube video transcripts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML configuration file"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port for the HTTP API")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Directory for job and flashcard records"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        // an explicit path must load; the default locations may be absent
        Err(e) if config_path.is_some() => return Err(e),
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::from_env()
        }
    };

    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config.storage.data_dir = PathBuf::from(dir);
    }

    let verbose = matches.get_flag("verbose");
    init_tracing(&config, verbose);

    config.validate()?;
    info!("🚀 Flashcard Forge starting...");
    info!("{}", config.summary());

    let config = Arc::new(config);
    let controller = JobController::from_config(&config).await?;
    let shutdown = CancellationToken::new();

    if config.sweeper.enabled {
        let sweeper = StallSweeper::new(Arc::clone(controller.job_store()), &config.sweeper);
        tokio::spawn(sweeper.run(shutdown.clone()));
    }

    match controller.resume_queued(RESUME_BATCH).await {
        Ok(0) => {}
        Ok(count) => info!("Picked up {} queued jobs from a previous run", count),
        Err(e) => warn!("Could not resume queued jobs: {}", e),
    }

    let server_shutdown = shutdown.clone();
    let server = ApiServer::new(Arc::clone(&controller), Arc::clone(&config));
    let server_task = server.start_background(async move { server_shutdown.cancelled().await });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    shutdown.cancel();

    match server_task.await {
        Ok(result) => result?,
        Err(e) => error!("API server task failed: {}", e),
    }

    let running = controller.running_jobs().await;
    if running > 0 {
        warn!("{} jobs interrupted; the stall sweeper will fail them after the threshold", running);
    }

    info!("👋 Flashcard Forge stopped");
    Ok(())
}

fn init_tracing(config: &Config, verbose: bool) {
    let default_filter = if verbose {
        "flashcard_forge=debug,tower_http=debug".to_string()
    } else {
        format!("flashcard_forge={},tower_http=info", config.logging.level)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
