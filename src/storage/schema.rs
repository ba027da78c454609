//! SQLite schema definitions for backtest run storage
//!
//! Tables:
//! - runs: One row per backtest run, with parameters and trajectory
//! - wagers: Settled wagers of a run, in placement order
//! - run_events: Run events, in occurrence order

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            strategy TEXT NOT NULL,
            params TEXT NOT NULL,
            range_start TEXT NOT NULL,
            range_end TEXT NOT NULL,
            starting_bankroll REAL NOT NULL,
            final_bankroll REAL NOT NULL,
            status TEXT NOT NULL,
            unresolved INTEGER NOT NULL,
            races_processed INTEGER NOT NULL,
            trajectory TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS wagers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(id),
            seq INTEGER NOT NULL,
            race_id TEXT NOT NULL,
            post_position INTEGER NOT NULL,
            horse_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            stake REAL NOT NULL,
            price REAL NOT NULL,
            payout REAL NOT NULL,
            won INTEGER NOT NULL,
            void INTEGER NOT NULL,
            bankroll_after REAL NOT NULL,
            placed_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS run_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(id),
            seq INTEGER NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_wagers_run ON wagers(run_id, seq)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_run ON run_events(run_id, seq)",
        [],
    )?;

    Ok(())
}
