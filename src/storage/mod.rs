//! SQLite storage for backtest runs.
//!
//! Completed runs are persisted with their full wager and event history so
//! reports can be regenerated without re-simulating.

pub mod repository;
pub mod schema;

pub use repository::RunRepository;
