//! SQLite repository for backtest runs.
//!
//! Saving a run replaces any previous run with the same id, so a rerun of
//! the same configuration overwrites its earlier record instead of
//! duplicating it. JSON columns carry the structured pieces (parameters,
//! trajectory, events); wagers get their own rows for queryability.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use super::schema::create_tables;
use crate::error::EngineError;
use crate::simulator::{BacktestRun, DateRange, RunStatus, SimEvent, WagerRecord};

/// Identifying row of a stored run, as returned by listings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRow {
    pub id: String,
    pub strategy: String,
    pub status: RunStatus,
    pub starting_bankroll: f64,
    pub final_bankroll: f64,
}

/// Repository for backtest runs
pub struct RunRepository {
    conn: Connection,
}

impl RunRepository {
    /// Open (and initialize if needed) a run database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory repository, used by the server when no path is configured
    /// and by tests.
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    /// Persist a run, replacing any earlier run with the same id.
    pub fn save_run(&mut self, run: &BacktestRun) -> Result<(), EngineError> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM wagers WHERE run_id = ?1", params![run.id])?;
        tx.execute("DELETE FROM run_events WHERE run_id = ?1", params![run.id])?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO runs (
                id, strategy, params, range_start, range_end,
                starting_bankroll, final_bankroll, status,
                unresolved, races_processed, trajectory
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                run.id,
                run.strategy,
                serde_json::to_string(&run.params)?,
                run.range.start.to_rfc3339(),
                run.range.end.to_rfc3339(),
                run.starting_bankroll,
                run.final_bankroll,
                serde_json::to_string(&run.status)?,
                run.unresolved,
                run.races_processed,
                serde_json::to_string(&run.bankroll_trajectory)?,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO wagers (
                    run_id, seq, race_id, post_position, horse_id, kind,
                    stake, price, payout, won, void, bankroll_after, placed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;
            for (seq, wager) in run.wagers.iter().enumerate() {
                stmt.execute(params![
                    run.id,
                    seq as i64,
                    wager.race_id,
                    wager.post_position,
                    wager.horse_id,
                    serde_json::to_string(&wager.kind)?,
                    wager.stake,
                    wager.price,
                    wager.payout,
                    wager.won,
                    wager.void,
                    wager.bankroll_after,
                    wager.placed_at.to_rfc3339(),
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO run_events (run_id, seq, payload) VALUES (?1, ?2, ?3)",
            )?;
            for (seq, event) in run.events.iter().enumerate() {
                stmt.execute(params![run.id, seq as i64, serde_json::to_string(event)?])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Load a full run by id.
    pub fn get_run(&self, run_id: &str) -> Result<BacktestRun, EngineError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT strategy, params, range_start, range_end,
                       starting_bankroll, final_bankroll, status,
                       unresolved, races_processed, trajectory
                FROM runs WHERE id = ?1
                "#,
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, u32>(7)?,
                        row.get::<_, u32>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        let (
            strategy,
            params_json,
            range_start,
            range_end,
            starting_bankroll,
            final_bankroll,
            status_json,
            unresolved,
            races_processed,
            trajectory_json,
        ) = row;

        Ok(BacktestRun {
            id: run_id.to_string(),
            strategy,
            params: serde_json::from_str(&params_json)?,
            range: DateRange {
                start: parse_timestamp(&range_start)?,
                end: parse_timestamp(&range_end)?,
            },
            starting_bankroll,
            final_bankroll,
            status: serde_json::from_str(&status_json)?,
            wagers: self.load_wagers(run_id)?,
            bankroll_trajectory: serde_json::from_str(&trajectory_json)?,
            events: self.load_events(run_id)?,
            unresolved,
            races_processed,
        })
    }

    /// All stored runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunRow>, EngineError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, strategy, status, starting_bankroll, final_bankroll
            FROM runs ORDER BY created_at DESC, id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, strategy, status_json, starting_bankroll, final_bankroll) = row?;
            runs.push(RunRow {
                id,
                strategy,
                status: serde_json::from_str(&status_json)?,
                starting_bankroll,
                final_bankroll,
            });
        }
        Ok(runs)
    }

    fn load_wagers(&self, run_id: &str) -> Result<Vec<WagerRecord>, EngineError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT race_id, post_position, horse_id, kind, stake, price,
                   payout, won, void, bankroll_after, placed_at
            FROM wagers WHERE run_id = ?1 ORDER BY seq
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u8>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, bool>(8)?,
                row.get::<_, f64>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?;

        let mut wagers = Vec::new();
        for row in rows {
            let (
                race_id,
                post_position,
                horse_id,
                kind_json,
                stake,
                price,
                payout,
                won,
                void,
                bankroll_after,
                placed_at,
            ) = row?;
            wagers.push(WagerRecord {
                race_id,
                post_position,
                horse_id,
                kind: serde_json::from_str(&kind_json)?,
                stake,
                price,
                payout,
                won,
                void,
                bankroll_after,
                placed_at: parse_timestamp(&placed_at)?,
            });
        }
        Ok(wagers)
    }

    fn load_events(&self, run_id: &str) -> Result<Vec<SimEvent>, EngineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM run_events WHERE run_id = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for payload in rows {
            events.push(serde_json::from_str(&payload?)?);
        }
        Ok(events)
    }
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>, EngineError> {
    // Stored as RFC 3339; round-trip through the serde parser so a corrupt
    // column surfaces as a serialization error.
    serde_json::from_str(&format!("\"{}\"", s)).map_err(EngineError::Serialization)
}
