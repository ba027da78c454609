//! Canonical entities and the in-memory, time-indexed entity store.
//!
//! Entities are immutable once ingested. A corrected re-ingestion of a race
//! supersedes the previous version; the old version is kept for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Racing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Turf,
    Dirt,
}

impl Surface {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "turf" => Some(Surface::Turf),
            "dirt" => Some(Surface::Dirt),
            _ => None,
        }
    }
}

/// Going of the track on race day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackCondition {
    Firm,
    Good,
    Soft,
    Heavy,
}

impl TrackCondition {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "firm" => Some(TrackCondition::Firm),
            "good" => Some(TrackCondition::Good),
            "soft" => Some(TrackCondition::Soft),
            "heavy" => Some(TrackCondition::Heavy),
            _ => None,
        }
    }
}

/// Race grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    G1,
    G2,
    G3,
    Open,
    Ungraded,
}

impl Grade {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "G1" => Some(Grade::G1),
            "G2" => Some(Grade::G2),
            "G3" => Some(Grade::G3),
            "OP" | "OPEN" => Some(Grade::Open),
            "" | "UNGRADED" => Some(Grade::Ungraded),
            _ => None,
        }
    }

    /// Numeric class level, higher is better company.
    pub fn level(&self) -> f64 {
        match self {
            Grade::G1 => 4.0,
            Grade::G2 => 3.0,
            Grade::G3 => 2.0,
            Grade::Open => 1.0,
            Grade::Ungraded => 0.0,
        }
    }
}

/// A race card. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub race_id: String,
    pub track: String,
    pub start_time: DateTime<Utc>,
    pub surface: Surface,
    pub track_condition: TrackCondition,
    pub distance: u32,
    pub grade: Grade,
}

/// A single horse-jockey entry in one race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    pub race_id: String,
    pub post_position: u8,
    pub horse_id: String,
    pub jockey_id: String,
    pub weight_carried: f64,
}

/// A win/place price observation for one runner at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub race_id: String,
    pub post_position: u8,
    pub at: DateTime<Utc>,
    /// Decimal win odds (total return per unit staked).
    pub win_price: f64,
    /// Decimal place odds, when quoted.
    pub place_price: Option<f64>,
}

/// Finishing position of one runner, with official payout prices when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placing {
    pub post_position: u8,
    /// Shared rank under a dead heat.
    pub position: u32,
    /// Lengths behind the winner.
    pub margin: f64,
    pub win_payout: Option<f64>,
    pub place_payout: Option<f64>,
}

/// Official outcome of a race. Its absence marks the race as unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub race_id: String,
    pub dead_heat: bool,
    pub placings: Vec<Placing>,
}

impl ResultEntry {
    pub fn placing_for(&self, post_position: u8) -> Option<&Placing> {
        self.placings.iter().find(|p| p.post_position == post_position)
    }

    /// Number of runners sharing a given finishing position.
    pub fn shared_rank_count(&self, position: u32) -> usize {
        self.placings.iter().filter(|p| p.position == position).count()
    }
}

/// In-memory store of canonical entities, indexed for chronological replay.
///
/// Iteration orders are all BTreeMap-backed so replays are reproducible.
#[derive(Debug, Default)]
pub struct EntityStore {
    races: BTreeMap<String, Race>,
    /// Previous versions of re-ingested races, kept for audit.
    superseded: Vec<Race>,
    runners: BTreeMap<String, Vec<Runner>>,
    /// Snapshots per (race, post position), sorted by timestamp.
    odds: BTreeMap<(String, u8), Vec<OddsSnapshot>>,
    results: BTreeMap<String, ResultEntry>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_race(&mut self, race: Race) {
        if let Some(old) = self.races.insert(race.race_id.clone(), race) {
            self.superseded.push(old);
        }
    }

    pub fn insert_runner(&mut self, runner: Runner) {
        let entries = self.runners.entry(runner.race_id.clone()).or_default();
        entries.push(runner);
        entries.sort_by_key(|r| r.post_position);
    }

    pub fn insert_odds(&mut self, snapshot: OddsSnapshot) {
        let key = (snapshot.race_id.clone(), snapshot.post_position);
        let series = self.odds.entry(key).or_default();
        series.push(snapshot);
        series.sort_by_key(|s| s.at);
    }

    pub fn insert_result(&mut self, result: ResultEntry) {
        self.results.insert(result.race_id.clone(), result);
    }

    pub fn race(&self, race_id: &str) -> Option<&Race> {
        self.races.get(race_id)
    }

    pub fn has_race(&self, race_id: &str) -> bool {
        self.races.contains_key(race_id)
    }

    pub fn runners(&self, race_id: &str) -> &[Runner] {
        self.runners.get(race_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_runner(&self, race_id: &str, post_position: u8) -> bool {
        self.runners(race_id)
            .iter()
            .any(|r| r.post_position == post_position)
    }

    pub fn result(&self, race_id: &str) -> Option<&ResultEntry> {
        self.results.get(race_id)
    }

    /// Latest snapshot at or before `at` for one runner, never a later one.
    pub fn odds_at_or_before(
        &self,
        race_id: &str,
        post_position: u8,
        at: DateTime<Utc>,
    ) -> Option<&OddsSnapshot> {
        self.odds
            .get(&(race_id.to_string(), post_position))?
            .iter()
            .rev()
            .find(|s| s.at <= at)
    }

    /// Races with a start time inside `[start, end)`, sorted by
    /// (start time, race id) for a stable replay order.
    pub fn races_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Race> {
        let mut races: Vec<&Race> = self
            .races
            .values()
            .filter(|r| r.start_time >= start && r.start_time < end)
            .collect();
        races.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.race_id.cmp(&b.race_id))
        });
        races
    }

    /// All races in chronological order.
    pub fn races_chronological(&self) -> Vec<&Race> {
        let mut races: Vec<&Race> = self.races.values().collect();
        races.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.race_id.cmp(&b.race_id))
        });
        races
    }

    pub fn race_count(&self) -> usize {
        self.races.len()
    }

    pub fn superseded_count(&self) -> usize {
        self.superseded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn test_race(id: &str, h: u32) -> Race {
        Race {
            race_id: id.to_string(),
            track: "Nakayama".to_string(),
            start_time: ts(h, 0),
            surface: Surface::Turf,
            track_condition: TrackCondition::Good,
            distance: 1600,
            grade: Grade::Open,
        }
    }

    #[test]
    fn test_grade_parse_and_level() {
        assert_eq!(Grade::parse("G1"), Some(Grade::G1));
        assert_eq!(Grade::parse("op"), Some(Grade::Open));
        assert_eq!(Grade::parse("listed"), None);
        assert!(Grade::G1.level() > Grade::G3.level());
    }

    #[test]
    fn test_reingestion_supersedes_and_keeps_audit() {
        let mut store = EntityStore::new();
        store.insert_race(test_race("R1", 5));
        let mut corrected = test_race("R1", 5);
        corrected.distance = 1800;
        store.insert_race(corrected);

        assert_eq!(store.race_count(), 1);
        assert_eq!(store.superseded_count(), 1);
        assert_eq!(store.race("R1").unwrap().distance, 1800);
    }

    #[test]
    fn test_odds_at_or_before_ignores_later_snapshots() {
        let mut store = EntityStore::new();
        store.insert_race(test_race("R1", 5));
        for (minute, price) in [(30, 3.0), (50, 2.5), (70, 1.8)] {
            store.insert_odds(OddsSnapshot {
                race_id: "R1".to_string(),
                post_position: 1,
                at: ts(4, minute % 60) + chrono::Duration::hours((minute / 60) as i64),
                win_price: price,
                place_price: None,
            });
        }

        // Post time 05:00: the 05:10 snapshot must never be chosen.
        let snap = store.odds_at_or_before("R1", 1, ts(5, 0)).unwrap();
        assert_eq!(snap.win_price, 2.5);

        // Before any snapshot: nothing.
        assert!(store.odds_at_or_before("R1", 1, ts(4, 0)).is_none());
    }

    #[test]
    fn test_races_between_sorted_and_half_open() {
        let mut store = EntityStore::new();
        store.insert_race(test_race("B", 6));
        store.insert_race(test_race("A", 6));
        store.insert_race(test_race("C", 8));

        let races = store.races_between(ts(5, 0), ts(8, 0));
        let ids: Vec<&str> = races.iter().map(|r| r.race_id.as_str()).collect();
        // Same start time: ordered by race id. 08:00 excluded (half-open).
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_shared_rank_count() {
        let result = ResultEntry {
            race_id: "R1".to_string(),
            dead_heat: true,
            placings: vec![
                Placing {
                    post_position: 1,
                    position: 1,
                    margin: 0.0,
                    win_payout: None,
                    place_payout: None,
                },
                Placing {
                    post_position: 2,
                    position: 1,
                    margin: 0.0,
                    win_payout: None,
                    place_payout: None,
                },
                Placing {
                    post_position: 3,
                    position: 3,
                    margin: 2.0,
                    win_payout: None,
                    place_payout: None,
                },
            ],
        };
        assert_eq!(result.shared_rank_count(1), 2);
        assert_eq!(result.shared_rank_count(3), 1);
    }
}
