//! Request and response types for the API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::predictor::Prediction;
use crate::simulator::RunStatus;
use crate::strategy::StrategySpec;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Races currently loaded in the entity store.
    pub races: usize,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Predictions for one race.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionsResponse {
    pub race_id: String,
    pub predictions: Vec<Prediction>,
}

/// Backtest request: a strategy plus an inclusive date range.
#[derive(Debug, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub strategy: StrategySpec,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Overrides the configured starting bankroll when set.
    #[serde(default)]
    pub starting_bankroll: Option<f64>,
}

/// One stored run in a listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunListItem {
    pub id: String,
    pub strategy: String,
    pub status: RunStatus,
    pub starting_bankroll: f64,
    pub final_bankroll: f64,
}
