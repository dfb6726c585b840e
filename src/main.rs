//! faceattend - automated class-attendance service
//!
//! Single-process service: SQLite-backed store, one scheduler task driving
//! the session lifecycle, and an HTTP surface for recognition requests and
//! administration. Face embeddings come from an external inference service.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use faceattend::clock::SystemClock;
use faceattend::config::EngineConfig;
use faceattend::recognition::RemoteEmbeddingProvider;
use faceattend::scheduler::SessionScheduler;
use faceattend::server::{self, AppState};

/// faceattend - timetable-driven attendance with face-recognition check-in
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file path
    #[arg(long, value_name = "FILE", default_value = "faceattend.db")]
    db: PathBuf,

    /// Host address to bind to
    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(short, long, value_name = "PORT", default_value_t = 5780)]
    port: u16,

    /// Base URL of the face embedding inference service
    #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:5781")]
    embedder: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("faceattend={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("faceattend starting...");

    // Database (schema mismatch or unreachable storage is fatal)
    info!("Initializing database...");
    let db = faceattend::db::init_database(&args.db).await?;
    info!("Database initialized at: {}", args.db.display());

    // Embedding provider; a missing model at startup means refusing to serve
    info!("Probing embedding service at {}...", args.embedder);
    let provider = Arc::new(RemoteEmbeddingProvider::new(args.embedder.clone()));
    provider.check_ready().await?;
    info!("Embedding service ready");

    let config = EngineConfig::from_database(&db).await?;
    let clock = Arc::new(SystemClock);

    // Scheduler task
    let scheduler = Arc::new(SessionScheduler::new(db.clone(), clock.clone()));
    scheduler.spawn(config.scheduler_tick_seconds);

    // HTTP server
    let state = AppState::new(db, clock, provider);
    let bind_addr = format!("{}:{}", args.host, args.port);
    info!("Starting HTTP server on {}...", bind_addr);

    server::start(&bind_addr, state).await?;

    Ok(())
}
