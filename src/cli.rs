//! CLI commands for the keiba engine.
//!
//! Supports API server mode, one-off prediction, and backtesting over a
//! raw record file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::engine::Engine;
use crate::ingest::RawRecord;
use crate::predictor::FormScorer;
use crate::report::{print_report_table, summarize};
use crate::simulator::CancelToken;
use crate::storage::RunRepository;
use crate::strategy::{BetKind, StrategyParams, StrategySpec};

#[derive(Parser)]
#[command(name = "keiba-engine")]
#[command(version, about = "Horse racing prediction and backtest engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Raw record JSON file to load at startup
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Predict one race from a raw record file
    Predict {
        /// Path to raw record JSON file
        #[arg(value_name = "FILE")]
        data: PathBuf,

        /// Race to predict
        #[arg(short, long)]
        race_id: String,

        /// Output format (json, table)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Run a backtest over a raw record file
    Backtest {
        /// Path to raw record JSON file
        #[arg(value_name = "FILE")]
        data: PathBuf,

        /// Strategy name (favorite, longshot, value)
        #[arg(short, long, default_value = "favorite")]
        strategy: String,

        /// First race day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start_date: chrono::NaiveDate,

        /// Last race day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end_date: chrono::NaiveDate,

        /// Starting bankroll override
        #[arg(long)]
        bankroll: Option<f64>,

        /// Flat stake per wager
        #[arg(long, default_value_t = 10.0)]
        stake: f64,

        /// Bet type (win, place)
        #[arg(long, default_value = "win")]
        bet_kind: String,

        /// Clamp oversized stakes instead of rejecting them
        #[arg(long)]
        auto_clamp: bool,

        /// Persist the run to this SQLite database
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

/// Load raw records from a JSON file.
pub fn load_records(path: &PathBuf) -> anyhow::Result<Vec<RawRecord>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Build an engine loaded with the records in `path`.
fn load_engine(config: AppConfig, path: &PathBuf) -> anyhow::Result<Engine> {
    let records = load_records(path)?;
    let mut engine = Engine::new(config, Arc::new(FormScorer));
    let summary = engine.ingest(&records);
    eprintln!(
        "Loaded {} records ({} rejected), {} races",
        summary.accepted,
        summary.rejections.len(),
        engine.race_count()
    );
    for rejection in &summary.rejections {
        eprintln!(
            "  rejected {} record #{}: {}",
            rejection.kind.name(),
            rejection.index,
            rejection.reason
        );
    }
    Ok(engine)
}

/// Run CLI prediction from file.
pub fn run_predict(data: PathBuf, race_id: String, format: String) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let engine = load_engine(config, &data)?;

    let predictions = engine.predictions(&race_id)?;
    match format.as_str() {
        "table" => {
            println!("Race {}", race_id);
            println!("{:>4} {:>4}  {:<16} {:>11}", "rank", "post", "horse", "probability");
            for p in &predictions {
                println!(
                    "{:>4} {:>4}  {:<16} {:>10.1}%",
                    p.rank,
                    p.post_position,
                    p.horse_id,
                    p.probability * 100.0
                );
            }
        }
        _ => println!("{}", serde_json::to_string_pretty(&predictions)?),
    }
    Ok(())
}

/// Run CLI backtest from file.
#[allow(clippy::too_many_arguments)]
pub fn run_backtest(
    data: PathBuf,
    strategy: String,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
    bankroll: Option<f64>,
    stake: f64,
    bet_kind: String,
    auto_clamp: bool,
    db: Option<PathBuf>,
    format: String,
) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let engine = load_engine(config, &data)?;

    let bet_kind = match bet_kind.as_str() {
        "win" => BetKind::Win,
        "place" => BetKind::Place,
        other => anyhow::bail!("unknown bet type: {}", other),
    };
    let spec = StrategySpec {
        name: strategy,
        params: StrategyParams {
            stake,
            bet_kind,
            auto_clamp,
            ..StrategyParams::default()
        },
    };

    let run = engine.run_backtest(&spec, start_date, end_date, bankroll, &CancelToken::new())?;

    if let Some(db_path) = db {
        let mut repository = RunRepository::new(&db_path)?;
        repository.save_run(&run)?;
        eprintln!("Saved run {} to {}", run.id, db_path.display());
    }

    let report = summarize(&run);
    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report_table(&report),
    }
    Ok(())
}
