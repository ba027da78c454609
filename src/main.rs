//! Keiba Engine
//!
//! REST API and CLI for horse racing predictions and strategy backtesting.

mod betting;
mod cli;
mod config;
mod engine;
mod entities;
mod error;
mod features;
mod history;
mod ingest;
mod normalizer;
mod predictor;
mod report;
mod routes;
mod simulator;
mod storage;
mod strategy;
mod types;

use axum::{routing::get, routing::post, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::engine::Engine;
use crate::predictor::FormScorer;
use crate::routes::AppState;
use crate::storage::RunRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, data } => run_server(Some(host), Some(port), data).await,
        Commands::Predict {
            data,
            race_id,
            format,
        } => cli::run_predict(data, race_id, format),
        Commands::Backtest {
            data,
            strategy,
            start_date,
            end_date,
            bankroll,
            stake,
            bet_kind,
            auto_clamp,
            db,
            format,
        } => cli::run_backtest(
            data, strategy, start_date, end_date, bankroll, stake, bet_kind, auto_clamp, db,
            format,
        ),
    }
}

/// Run the API server.
async fn run_server(
    host: Option<String>,
    port: Option<u16>,
    data: Option<PathBuf>,
) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keiba_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = AppConfig::load()?;

    // Override with CLI args
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(p) = port {
        config.server.port = p;
    }

    tracing::info!("Configuration loaded");

    let repository = match config.storage.db_path.as_deref() {
        Some(path) => RunRepository::new(Path::new(path))?,
        None => RunRepository::in_memory()?,
    };

    let mut engine = Engine::new(config.clone(), Arc::new(FormScorer));
    if let Some(path) = data {
        tracing::info!("Loading records from {}", path.display());
        let records = cli::load_records(&path)?;
        let summary = engine.ingest(&records);
        tracing::info!(
            accepted = summary.accepted,
            rejected = summary.rejections.len(),
            "startup ingestion complete"
        );
    }

    // Create application state
    let state = Arc::new(AppState {
        engine,
        repository: Mutex::new(repository),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/predictions/:race_id", get(routes::predictions))
        .route("/backtest", post(routes::run_backtest))
        .route("/reports/:run_id", get(routes::get_report))
        .route("/runs", get(routes::list_runs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
