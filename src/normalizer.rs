//! Entity normalizer: validates raw ingested records into canonical entities.
//!
//! Malformed records are reported individually with a structured reason;
//! a bad record never aborts the batch. The normalizer has no side effects,
//! persistence is the storage collaborator's job.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::entities::{
    EntityStore, Grade, OddsSnapshot, Placing, Race, ResultEntry, Runner, Surface, TrackCondition,
};
use crate::ingest::{RawRecord, RecordKind};

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {detail}")]
    InvalidValue { field: String, detail: String },

    #[error("race {0} does not exist")]
    UnknownRace(String),

    #[error("runner {post_position} does not exist in race {race_id}")]
    UnknownRunner { race_id: String, post_position: u8 },

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("result positions for race {race_id} are invalid: {detail}")]
    InvalidPositions { race_id: String, detail: String },
}

/// A rejected record with its position in the input batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub index: usize,
    pub kind: RecordKind,
    pub reason: RejectReason,
}

/// Output of one normalization pass.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub races: Vec<Race>,
    pub runners: Vec<Runner>,
    pub odds: Vec<OddsSnapshot>,
    pub results: Vec<ResultEntry>,
    pub rejections: Vec<RejectedRecord>,
}

impl NormalizedBatch {
    pub fn accepted_count(&self) -> usize {
        self.races.len() + self.runners.len() + self.odds.len() + self.results.len()
    }

    /// Apply all accepted entities to a store.
    pub fn apply(self, store: &mut EntityStore) -> Vec<RejectedRecord> {
        for race in self.races {
            store.insert_race(race);
        }
        for runner in self.runners {
            store.insert_runner(runner);
        }
        for snapshot in self.odds {
            store.insert_odds(snapshot);
        }
        for result in self.results {
            store.insert_result(result);
        }
        self.rejections
    }
}

/// One raw `result` row before grouping into a race-level ResultEntry.
struct ResultRow {
    index: usize,
    placing: Placing,
    dead_heat: bool,
}

/// Normalize a batch of raw records against the already-known entities in
/// `store`. Referential checks accept entities from either the store or
/// earlier records of the same batch.
pub fn normalize_batch(records: &[RawRecord], store: &EntityStore) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    // Pass 1: races, so later records in the same batch can reference them.
    let mut batch_races: BTreeMap<String, ()> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        if record.kind != RecordKind::Race {
            continue;
        }
        match normalize_race(record) {
            Ok(race) => {
                if batch_races.contains_key(&race.race_id) {
                    batch.rejections.push(RejectedRecord {
                        index,
                        kind: record.kind,
                        reason: RejectReason::DuplicateKey(format!("race {}", race.race_id)),
                    });
                    continue;
                }
                batch_races.insert(race.race_id.clone(), ());
                batch.races.push(race);
            }
            Err(reason) => batch.rejections.push(RejectedRecord {
                index,
                kind: record.kind,
                reason,
            }),
        }
    }

    let race_known =
        |race_id: &str| batch_races.contains_key(race_id) || store.has_race(race_id);

    // Pass 2: runners.
    let mut batch_runners: BTreeMap<(String, u8), ()> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        if record.kind != RecordKind::Runner {
            continue;
        }
        match normalize_runner(record) {
            Ok(runner) => {
                if !race_known(&runner.race_id) {
                    batch.rejections.push(RejectedRecord {
                        index,
                        kind: record.kind,
                        reason: RejectReason::UnknownRace(runner.race_id),
                    });
                    continue;
                }
                let key = (runner.race_id.clone(), runner.post_position);
                if batch_runners.contains_key(&key) || store.has_runner(&key.0, key.1) {
                    batch.rejections.push(RejectedRecord {
                        index,
                        kind: record.kind,
                        reason: RejectReason::DuplicateKey(format!(
                            "runner {} in race {}",
                            runner.post_position, runner.race_id
                        )),
                    });
                    continue;
                }
                batch_runners.insert(key, ());
                batch.runners.push(runner);
            }
            Err(reason) => batch.rejections.push(RejectedRecord {
                index,
                kind: record.kind,
                reason,
            }),
        }
    }

    let runner_known = |race_id: &str, post: u8| {
        batch_runners.contains_key(&(race_id.to_string(), post)) || store.has_runner(race_id, post)
    };

    // Pass 3: odds snapshots and result rows.
    let mut result_rows: BTreeMap<String, Vec<ResultRow>> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        match record.kind {
            RecordKind::OddsSnapshot => match normalize_odds(record) {
                Ok(snapshot) => {
                    if !race_known(&snapshot.race_id) {
                        batch.rejections.push(RejectedRecord {
                            index,
                            kind: record.kind,
                            reason: RejectReason::UnknownRace(snapshot.race_id),
                        });
                    } else if !runner_known(&snapshot.race_id, snapshot.post_position) {
                        batch.rejections.push(RejectedRecord {
                            index,
                            kind: record.kind,
                            reason: RejectReason::UnknownRunner {
                                race_id: snapshot.race_id,
                                post_position: snapshot.post_position,
                            },
                        });
                    } else {
                        batch.odds.push(snapshot);
                    }
                }
                Err(reason) => batch.rejections.push(RejectedRecord {
                    index,
                    kind: record.kind,
                    reason,
                }),
            },
            RecordKind::Result => match normalize_result_row(record) {
                Ok((race_id, mut row)) => {
                    row.index = index;
                    if !race_known(&race_id) {
                        batch.rejections.push(RejectedRecord {
                            index,
                            kind: record.kind,
                            reason: RejectReason::UnknownRace(race_id),
                        });
                    } else if !runner_known(&race_id, row.placing.post_position) {
                        batch.rejections.push(RejectedRecord {
                            index,
                            kind: record.kind,
                            reason: RejectReason::UnknownRunner {
                                race_id,
                                post_position: row.placing.post_position,
                            },
                        });
                    } else {
                        result_rows.entry(race_id).or_default().push(row);
                    }
                }
                Err(reason) => batch.rejections.push(RejectedRecord {
                    index,
                    kind: record.kind,
                    reason,
                }),
            },
            RecordKind::Race | RecordKind::Runner => {}
        }
    }

    // Group result rows per race and validate the position permutation.
    for (race_id, rows) in result_rows {
        let first_index = rows.iter().map(|r| r.index).min().unwrap_or(0);
        let dead_heat = rows.iter().any(|r| r.dead_heat);

        if store.result(&race_id).is_some() {
            batch.rejections.push(RejectedRecord {
                index: first_index,
                kind: RecordKind::Result,
                reason: RejectReason::DuplicateKey(format!("result for race {}", race_id)),
            });
            continue;
        }

        let mut placings: Vec<Placing> = Vec::with_capacity(rows.len());
        let mut duplicate_post = None;
        for row in &rows {
            if placings
                .iter()
                .any(|p| p.post_position == row.placing.post_position)
            {
                duplicate_post = Some(row.placing.post_position);
                break;
            }
            placings.push(row.placing.clone());
        }
        if let Some(post) = duplicate_post {
            batch.rejections.push(RejectedRecord {
                index: first_index,
                kind: RecordKind::Result,
                reason: RejectReason::DuplicateKey(format!(
                    "result row for runner {} in race {}",
                    post, race_id
                )),
            });
            continue;
        }

        if let Err(detail) = validate_positions(&placings, dead_heat) {
            batch.rejections.push(RejectedRecord {
                index: first_index,
                kind: RecordKind::Result,
                reason: RejectReason::InvalidPositions { race_id, detail },
            });
            continue;
        }

        placings.sort_by_key(|p| (p.position, p.post_position));
        batch.results.push(ResultEntry {
            race_id,
            dead_heat,
            placings,
        });
    }

    batch
}

/// Positions must be a permutation of 1..=N. Under the dead-heat flag,
/// shared ranks follow competition ranking: a position p is valid when it
/// equals one plus the number of runners that finished strictly ahead.
fn validate_positions(placings: &[Placing], dead_heat: bool) -> Result<(), String> {
    if placings.is_empty() {
        return Err("no placings".to_string());
    }
    let mut positions: Vec<u32> = placings.iter().map(|p| p.position).collect();
    positions.sort_unstable();

    if !dead_heat {
        for (i, &p) in positions.iter().enumerate() {
            if p != (i + 1) as u32 {
                return Err(format!(
                    "expected permutation of 1..={}, found position {}",
                    positions.len(),
                    p
                ));
            }
        }
        return Ok(());
    }

    for &p in &positions {
        let ahead = positions.iter().filter(|&&q| q < p).count() as u32;
        if p != ahead + 1 {
            return Err(format!("position {} breaks competition ranking", p));
        }
    }
    Ok(())
}

fn require_text(record: &RawRecord, field: &str) -> Result<String, RejectReason> {
    record
        .text(field)
        .map(str::to_string)
        .ok_or_else(|| RejectReason::MissingField(field.to_string()))
}

fn require_post_position(record: &RawRecord) -> Result<u8, RejectReason> {
    let raw = record
        .integer("post_position")
        .ok_or_else(|| RejectReason::MissingField("post_position".to_string()))?;
    if !(1..=u8::MAX as i64).contains(&raw) {
        return Err(RejectReason::InvalidValue {
            field: "post_position".to_string(),
            detail: format!("{} is not a valid post position", raw),
        });
    }
    Ok(raw as u8)
}

fn normalize_race(record: &RawRecord) -> Result<Race, RejectReason> {
    let race_id = require_text(record, "race_id")?;
    let track = require_text(record, "track")?;
    let start_time = record
        .timestamp("start_time")
        .ok_or_else(|| RejectReason::MissingField("start_time".to_string()))?;

    let surface = match record.text("surface") {
        Some(s) => Surface::parse(s).ok_or_else(|| RejectReason::InvalidValue {
            field: "surface".to_string(),
            detail: s.to_string(),
        })?,
        None => Surface::Turf,
    };
    let track_condition = match record.text("track_condition") {
        Some(s) => TrackCondition::parse(s).ok_or_else(|| RejectReason::InvalidValue {
            field: "track_condition".to_string(),
            detail: s.to_string(),
        })?,
        None => TrackCondition::Good,
    };
    let grade = match record.text("grade") {
        Some(s) => Grade::parse(s).ok_or_else(|| RejectReason::InvalidValue {
            field: "grade".to_string(),
            detail: s.to_string(),
        })?,
        None => Grade::Ungraded,
    };
    let distance = record.integer("distance").unwrap_or(0);
    if distance < 0 {
        return Err(RejectReason::InvalidValue {
            field: "distance".to_string(),
            detail: distance.to_string(),
        });
    }

    Ok(Race {
        race_id,
        track,
        start_time,
        surface,
        track_condition,
        distance: distance as u32,
        grade,
    })
}

fn normalize_runner(record: &RawRecord) -> Result<Runner, RejectReason> {
    Ok(Runner {
        race_id: require_text(record, "race_id")?,
        post_position: require_post_position(record)?,
        horse_id: require_text(record, "horse_id")?,
        jockey_id: require_text(record, "jockey_id")?,
        weight_carried: record.number("weight_carried").unwrap_or(0.0),
    })
}

fn normalize_odds(record: &RawRecord) -> Result<OddsSnapshot, RejectReason> {
    let race_id = require_text(record, "race_id")?;
    let post_position = require_post_position(record)?;
    let at = record
        .timestamp("at")
        .ok_or_else(|| RejectReason::MissingField("at".to_string()))?;
    let win_price = record
        .number("win_price")
        .ok_or_else(|| RejectReason::MissingField("win_price".to_string()))?;
    if win_price <= 0.0 {
        return Err(RejectReason::InvalidValue {
            field: "win_price".to_string(),
            detail: win_price.to_string(),
        });
    }
    let place_price = record.number("place_price");
    if let Some(p) = place_price {
        if p <= 0.0 {
            return Err(RejectReason::InvalidValue {
                field: "place_price".to_string(),
                detail: p.to_string(),
            });
        }
    }

    Ok(OddsSnapshot {
        race_id,
        post_position,
        at,
        win_price,
        place_price,
    })
}

fn normalize_result_row(record: &RawRecord) -> Result<(String, ResultRow), RejectReason> {
    let race_id = require_text(record, "race_id")?;
    let post_position = require_post_position(record)?;
    let position = record
        .integer("position")
        .ok_or_else(|| RejectReason::MissingField("position".to_string()))?;
    if position < 1 {
        return Err(RejectReason::InvalidValue {
            field: "position".to_string(),
            detail: position.to_string(),
        });
    }

    Ok((
        race_id,
        ResultRow {
            index: 0,
            placing: Placing {
                post_position,
                position: position as u32,
                margin: record.number("margin").unwrap_or(0.0),
                win_payout: record.number("win_payout"),
                place_payout: record.number("place_payout"),
            },
            dead_heat: record.integer("dead_heat").unwrap_or(0) != 0,
        },
    ))
}
