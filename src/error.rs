//! Error taxonomy for the prediction and backtest engine.
//!
//! Recoverable conditions (bad input records, races that cannot be
//! predicted) are surfaced per record or per race and never abort a batch.
//! A temporal violation is fatal to the computation that hit it; the
//! simulator records it on the run and finalizes the run as aborted.

use thiserror::Error;

/// Errors raised by the engine core.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An attempt to read data dated at or after the race being computed.
    /// Always fatal: it indicates a correctness bug, never corrected silently.
    #[error("temporal violation: {0}")]
    TemporalViolation(String),

    /// A runner is missing one or more required feature families.
    #[error("incomplete feature set for runner {post_position} in race {race_id}")]
    IncompleteFeatureSet {
        race_id: String,
        post_position: u8,
    },

    /// A race with zero runners cannot be predicted.
    #[error("race {0} has no runners")]
    EmptyRace(String),

    #[error("race {0} not found")]
    RaceNotFound(String),

    #[error("backtest run {0} not found")]
    RunNotFound(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
