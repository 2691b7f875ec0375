//! Tutor Problem Service (tutor-ps) - Main entry point
//!
//! Runs the adaptive math problem pipeline service: staged problem
//! runs with bank-backed caching, per-session SSE progress, and
//! server-side grading with misconception follow-up.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutor_ps::api::server::{self, AppContext};
use tutor_ps::bank::ProblemBank;
use tutor_ps::channel::EventChannel;
use tutor_ps::config::Config;
use tutor_ps::generator::HttpGenerator;
use tutor_ps::pipeline::PipelineDeps;
use tutor_ps::registry::SessionRegistry;

/// Command-line arguments for tutor-ps
#[derive(Parser, Debug)]
#[command(name = "tutor-ps")]
#[command(about = "Adaptive math problem pipeline service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5850", env = "TUTOR_PS_PORT")]
    port: u16,

    /// SQLite database file
    #[arg(short, long, default_value = "tutor.db", env = "TUTOR_DB_PATH")]
    database: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long, env = "TUTOR_PS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_ps=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!("Starting Tutor Problem Service on port {}", args.port);
    info!("Database: {}", args.database.display());

    let pool = tutor_common::db::init_database(&args.database)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized");

    let generator =
        HttpGenerator::new(config.generator.clone()).context("Failed to build generator client")?;

    let deps = PipelineDeps {
        pool: pool.clone(),
        bank: Arc::new(ProblemBank::new(pool)),
        registry: Arc::new(SessionRegistry::new()),
        channel: Arc::new(EventChannel::new(config.event_capacity)),
        generator: Arc::new(generator),
        config: Arc::new(config),
    };

    server::run(args.port, AppContext { deps })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
