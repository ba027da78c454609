//! Historical aggregates for feature computation.
//!
//! A `HistorySnapshot` is built once per backtest run from resolved races
//! and is immutable afterwards, so feature computation can fan out over it
//! without synchronization. Leakage control happens through `HistoryView`:
//! a view is bounded by a cutoff and only ever exposes runs that started
//! strictly before it.

use chrono::{DateTime, Utc};

use crate::entities::{EntityStore, Grade, Surface, TrackCondition};
use std::collections::BTreeMap;

/// One past run of a horse (and its jockey), extracted from a resolved race.
#[derive(Debug, Clone, PartialEq)]
pub struct PastRun {
    pub race_id: String,
    pub start_time: DateTime<Utc>,
    pub track: String,
    pub surface: Surface,
    pub track_condition: TrackCondition,
    pub distance: u32,
    pub grade: Grade,
    pub position: u32,
    pub field_size: u32,
    pub margin: f64,
}

impl PastRun {
    pub fn won(&self) -> bool {
        self.position == 1
    }

    pub fn placed(&self) -> bool {
        self.position <= 3
    }
}

/// Immutable index of all resolved runs, keyed by horse and by jockey,
/// each series sorted by start time ascending.
#[derive(Debug, Default)]
pub struct HistorySnapshot {
    by_horse: BTreeMap<String, Vec<PastRun>>,
    by_jockey: BTreeMap<String, Vec<PastRun>>,
}

impl HistorySnapshot {
    /// Build from every race in the store that has a ResultEntry.
    /// Unresolved races contribute nothing.
    pub fn build(store: &EntityStore) -> Self {
        let mut by_horse: BTreeMap<String, Vec<PastRun>> = BTreeMap::new();
        let mut by_jockey: BTreeMap<String, Vec<PastRun>> = BTreeMap::new();

        for race in store.races_chronological() {
            let result = match store.result(&race.race_id) {
                Some(r) => r,
                None => continue,
            };
            let field_size = result.placings.len() as u32;

            for runner in store.runners(&race.race_id) {
                let placing = match result.placing_for(runner.post_position) {
                    Some(p) => p,
                    None => continue,
                };
                let run = PastRun {
                    race_id: race.race_id.clone(),
                    start_time: race.start_time,
                    track: race.track.clone(),
                    surface: race.surface,
                    track_condition: race.track_condition,
                    distance: race.distance,
                    grade: race.grade,
                    position: placing.position,
                    field_size,
                    margin: placing.margin,
                };
                by_horse
                    .entry(runner.horse_id.clone())
                    .or_default()
                    .push(run.clone());
                by_jockey.entry(runner.jockey_id.clone()).or_default().push(run);
            }
        }

        // races_chronological already yields ascending start times, so the
        // per-entity series are sorted.
        Self { by_horse, by_jockey }
    }

    /// View of history strictly before `cutoff`.
    pub fn before(&self, cutoff: DateTime<Utc>) -> HistoryView<'_> {
        HistoryView {
            snapshot: self,
            cutoff,
        }
    }
}

/// A cutoff-bounded, read-only view over a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct HistoryView<'a> {
    snapshot: &'a HistorySnapshot,
    cutoff: DateTime<Utc>,
}

impl<'a> HistoryView<'a> {
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// All runs of a horse that started strictly before the cutoff.
    pub fn horse_runs(&self, horse_id: &str) -> &'a [PastRun] {
        Self::bounded(self.snapshot.by_horse.get(horse_id), self.cutoff)
    }

    /// All runs of a jockey that started strictly before the cutoff.
    pub fn jockey_runs(&self, jockey_id: &str) -> &'a [PastRun] {
        Self::bounded(self.snapshot.by_jockey.get(jockey_id), self.cutoff)
    }

    fn bounded(series: Option<&'a Vec<PastRun>>, cutoff: DateTime<Utc>) -> &'a [PastRun] {
        let series = match series {
            Some(s) => s.as_slice(),
            None => return &[],
        };
        let end = series.partition_point(|run| run.start_time < cutoff);
        &series[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Placing, Race, ResultEntry, Runner};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 5, 0, 0).unwrap()
    }

    fn add_resolved_race(store: &mut EntityStore, id: &str, day: u32, winner_post: u8) {
        store.insert_race(Race {
            race_id: id.to_string(),
            track: "Tokyo".to_string(),
            start_time: ts(day),
            surface: Surface::Turf,
            track_condition: TrackCondition::Good,
            distance: 1600,
            grade: Grade::Open,
        });
        for post in 1..=2u8 {
            store.insert_runner(Runner {
                race_id: id.to_string(),
                post_position: post,
                horse_id: format!("H{}", post),
                jockey_id: format!("J{}", post),
                weight_carried: 56.0,
            });
        }
        let placings = (1..=2u8)
            .map(|post| Placing {
                post_position: post,
                position: if post == winner_post { 1 } else { 2 },
                margin: if post == winner_post { 0.0 } else { 1.5 },
                win_payout: None,
                place_payout: None,
            })
            .collect();
        store.insert_result(ResultEntry {
            race_id: id.to_string(),
            dead_heat: false,
            placings,
        });
    }

    #[test]
    fn test_unresolved_races_excluded() {
        let mut store = EntityStore::new();
        add_resolved_race(&mut store, "R1", 1, 1);
        store.insert_race(Race {
            race_id: "R2".to_string(),
            track: "Tokyo".to_string(),
            start_time: ts(2),
            surface: Surface::Turf,
            track_condition: TrackCondition::Good,
            distance: 1600,
            grade: Grade::Open,
        });
        store.insert_runner(Runner {
            race_id: "R2".to_string(),
            post_position: 1,
            horse_id: "H1".to_string(),
            jockey_id: "J1".to_string(),
            weight_carried: 56.0,
        });

        let snapshot = HistorySnapshot::build(&store);
        let view = snapshot.before(ts(10));
        // R2 has no result and must not appear.
        assert_eq!(view.horse_runs("H1").len(), 1);
        assert_eq!(view.horse_runs("H1")[0].race_id, "R1");
    }

    #[test]
    fn test_cutoff_is_strict() {
        let mut store = EntityStore::new();
        add_resolved_race(&mut store, "R1", 1, 1);
        add_resolved_race(&mut store, "R2", 2, 2);
        add_resolved_race(&mut store, "R3", 3, 1);

        let snapshot = HistorySnapshot::build(&store);

        // Cutoff exactly at R2's start: only R1 is visible.
        let view = snapshot.before(ts(2));
        assert_eq!(view.horse_runs("H1").len(), 1);
        assert_eq!(view.jockey_runs("J1").len(), 1);

        let view = snapshot.before(ts(4));
        assert_eq!(view.horse_runs("H1").len(), 3);
    }

    #[test]
    fn test_unknown_entity_yields_empty() {
        let store = EntityStore::new();
        let snapshot = HistorySnapshot::build(&store);
        let view = snapshot.before(ts(1));
        assert!(view.horse_runs("nobody").is_empty());
        assert!(view.jockey_runs("nobody").is_empty());
    }

    #[test]
    fn test_won_and_placed() {
        let run = PastRun {
            race_id: "R1".to_string(),
            start_time: ts(1),
            track: "Tokyo".to_string(),
            surface: Surface::Dirt,
            track_condition: TrackCondition::Heavy,
            distance: 1800,
            grade: Grade::G3,
            position: 3,
            field_size: 12,
            margin: 2.25,
        };
        assert!(!run.won());
        assert!(run.placed());
    }
}
