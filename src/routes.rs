//! API route handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::{Arc, Mutex};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::report::{summarize, Report};
use crate::simulator::CancelToken;
use crate::storage::RunRepository;
use crate::types::{
    BacktestRequest, ErrorResponse, HealthResponse, PredictionsResponse, RunListItem,
};

/// Application state shared across handlers.
pub struct AppState {
    pub engine: Engine,
    pub repository: Mutex<RunRepository>,
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::RaceNotFound(_) | EngineError::RunNotFound(_) => {
                ApiError::not_found(err.to_string())
            }
            EngineError::UnknownStrategy(_)
            | EngineError::EmptyRace(_)
            | EngineError::IncompleteFeatureSet { .. } => ApiError::bad_request(err.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        races: state.engine.race_count(),
    })
}

/// Predictions for one race.
pub async fn predictions(
    State(state): State<Arc<AppState>>,
    Path(race_id): Path<String>,
) -> Result<Json<PredictionsResponse>, ApiError> {
    let predictions = state.engine.predictions(&race_id)?;
    Ok(Json(PredictionsResponse {
        race_id,
        predictions,
    }))
}

/// Run a backtest, persist it, and return its report.
pub async fn run_backtest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BacktestRequest>,
) -> Result<Json<Report>, ApiError> {
    if req.end_date < req.start_date {
        return Err(ApiError::bad_request("end_date precedes start_date"));
    }

    let run = state.engine.run_backtest(
        &req.strategy,
        req.start_date,
        req.end_date,
        req.starting_bankroll,
        &CancelToken::new(),
    )?;

    let mut repository = state
        .repository
        .lock()
        .map_err(|_| ApiError::internal("run repository unavailable"))?;
    repository.save_run(&run)?;

    Ok(Json(summarize(&run)))
}

/// Report for a stored run.
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Report>, ApiError> {
    let repository = state
        .repository
        .lock()
        .map_err(|_| ApiError::internal("run repository unavailable"))?;
    let run = repository.get_run(&run_id)?;
    Ok(Json(summarize(&run)))
}

/// All stored runs.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RunListItem>>, ApiError> {
    let repository = state
        .repository
        .lock()
        .map_err(|_| ApiError::internal("run repository unavailable"))?;
    let runs = repository
        .list_runs()?
        .into_iter()
        .map(|row| RunListItem {
            id: row.id,
            strategy: row.strategy,
            status: row.status,
            starting_bankroll: row.starting_bankroll,
            final_bankroll: row.final_bankroll,
        })
        .collect();
    Ok(Json(runs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::predictor::FormScorer;
    use crate::strategy::{StrategyParams, StrategySpec};
    use chrono::NaiveDate;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            engine: Engine::new(AppConfig::default(), Arc::new(FormScorer)),
            repository: Mutex::new(RunRepository::in_memory().unwrap()),
        })
    }

    #[tokio::test]
    async fn test_health() {
        let response = health(State(test_state())).await;
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.races, 0);
    }

    #[tokio::test]
    async fn test_predictions_unknown_race_is_404() {
        let err = predictions(State(test_state()), Path("R1".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_backtest_rejects_inverted_range() {
        let req = BacktestRequest {
            strategy: StrategySpec {
                name: "favorite".to_string(),
                params: StrategyParams::default(),
            },
            start_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            starting_bankroll: None,
        };
        let err = run_backtest(State(test_state()), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_backtest_persists_run_for_reporting() {
        let state = test_state();
        let req = BacktestRequest {
            strategy: StrategySpec {
                name: "favorite".to_string(),
                params: StrategyParams::default(),
            },
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            starting_bankroll: None,
        };
        let report = run_backtest(State(state.clone()), Json(req)).await.unwrap();

        let run_id = match &report.0 {
            Report::NoWagersPlaced { run_id, .. } => run_id.clone(),
            Report::Summary(s) => s.run_id.clone(),
        };
        let stored = get_report(State(state.clone()), Path(run_id)).await.unwrap();
        assert_eq!(stored.0, report.0);

        let runs = list_runs(State(state)).await.unwrap();
        assert_eq!(runs.0.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_400() {
        let req = BacktestRequest {
            strategy: StrategySpec {
                name: "martingale".to_string(),
                params: StrategyParams::default(),
            },
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            starting_bankroll: None,
        };
        let err = run_backtest(State(test_state()), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
