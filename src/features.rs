//! Leakage-free feature computation.
//!
//! For each runner in a target race, features are derived exclusively from
//! races that started strictly before the target race's post time. The
//! builder is a pure function of (race, runner, history view): identical
//! inputs always produce identical output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entities::{Race, Runner};
use crate::error::EngineError;
use crate::history::{HistoryView, PastRun};

/// Sentinel values for entities with no qualifying prior history.
///
/// Distinct from every observable value: rates and margins are >= 0, class
/// deltas lie within +/-4 grade levels, day gaps are >= 0.
pub struct Sentinels;

impl Sentinels {
    /// Cold start: zero prior races for the entity or filter in question.
    pub const COLD_START: f64 = -999.0;
    /// Debut: no prior race to measure a gap from.
    pub const DEBUT: f64 = -1.0;
}

/// Per-runner feature vector, keyed by (race, runner). Never persisted;
/// recomputed deterministically from upstream data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub horse_win_rate: f64,
    pub horse_place_rate: f64,
    pub horse_avg_margin: f64,
    pub jockey_win_rate: f64,
    pub track_affinity: f64,
    pub distance_affinity: f64,
    pub class_delta: f64,
    pub days_since_last: f64,
}

impl FeatureVector {
    /// Convert to array, fields in declaration order.
    pub fn to_array(&self) -> [f64; 8] {
        [
            self.horse_win_rate,
            self.horse_place_rate,
            self.horse_avg_margin,
            self.jockey_win_rate,
            self.track_affinity,
            self.distance_affinity,
            self.class_delta,
            self.days_since_last,
        ]
    }

    /// Every feature family present and finite.
    pub fn is_complete(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Whether a value is the cold-start sentinel rather than an observation.
    pub fn is_cold(value: f64) -> bool {
        value == Sentinels::COLD_START
    }
}

/// Trailing-window sizes for form features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Horse form window (last k races).
    #[serde(default = "default_form_window")]
    pub form_window: usize,
    /// Jockey form window (last k rides).
    #[serde(default = "default_jockey_window")]
    pub jockey_window: usize,
}

fn default_form_window() -> usize {
    5
}

fn default_jockey_window() -> usize {
    100
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            form_window: default_form_window(),
            jockey_window: default_jockey_window(),
        }
    }
}

/// Feature builder.
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Build one runner's feature vector from history strictly preceding
    /// the race. A history view whose cutoff lies after the race's post
    /// time would expose future-dated data and is rejected outright.
    pub fn build(
        &self,
        race: &Race,
        runner: &Runner,
        history: &HistoryView<'_>,
    ) -> Result<FeatureVector, EngineError> {
        if history.cutoff() > race.start_time {
            return Err(EngineError::TemporalViolation(format!(
                "history cutoff {} is after post time {} of race {}",
                history.cutoff(),
                race.start_time,
                race.race_id
            )));
        }

        let horse_runs = history.horse_runs(&runner.horse_id);
        let jockey_runs = history.jockey_runs(&runner.jockey_id);
        guard_no_future_runs(horse_runs, race)?;
        guard_no_future_runs(jockey_runs, race)?;

        Ok(FeatureVector {
            horse_win_rate: rate(last_n(horse_runs, self.config.form_window), PastRun::won),
            horse_place_rate: rate(last_n(horse_runs, self.config.form_window), PastRun::placed),
            horse_avg_margin: avg_margin(last_n(horse_runs, self.config.form_window)),
            jockey_win_rate: rate(last_n(jockey_runs, self.config.jockey_window), PastRun::won),
            track_affinity: track_affinity(horse_runs, race),
            distance_affinity: distance_affinity(horse_runs, race),
            class_delta: class_delta(horse_runs, race),
            days_since_last: days_since_last(horse_runs, race.start_time),
        })
    }

    /// Build features for every runner of a race, keyed by post position.
    pub fn build_race(
        &self,
        race: &Race,
        runners: &[Runner],
        history: &HistoryView<'_>,
    ) -> Result<BTreeMap<u8, FeatureVector>, EngineError> {
        let mut features = BTreeMap::new();
        for runner in runners {
            features.insert(runner.post_position, self.build(race, runner, history)?);
        }
        Ok(features)
    }
}

/// Belt-and-braces temporal check: no run handed to feature math may have
/// started at or after the target race.
fn guard_no_future_runs(runs: &[PastRun], race: &Race) -> Result<(), EngineError> {
    if let Some(run) = runs.last() {
        if run.start_time >= race.start_time {
            return Err(EngineError::TemporalViolation(format!(
                "run {} ({}) is not strictly before race {} ({})",
                run.race_id, run.start_time, race.race_id, race.start_time
            )));
        }
    }
    Ok(())
}

fn last_n(runs: &[PastRun], n: usize) -> &[PastRun] {
    let start = runs.len().saturating_sub(n);
    &runs[start..]
}

fn rate(runs: &[PastRun], predicate: impl Fn(&PastRun) -> bool) -> f64 {
    if runs.is_empty() {
        return Sentinels::COLD_START;
    }
    runs.iter().filter(|r| predicate(r)).count() as f64 / runs.len() as f64
}

fn avg_margin(runs: &[PastRun]) -> f64 {
    if runs.is_empty() {
        return Sentinels::COLD_START;
    }
    runs.iter().map(|r| r.margin).sum::<f64>() / runs.len() as f64
}

/// Place rate restricted to the same track, surface, and going.
fn track_affinity(runs: &[PastRun], race: &Race) -> f64 {
    let matching: Vec<&PastRun> = runs
        .iter()
        .filter(|r| {
            r.track == race.track
                && r.surface == race.surface
                && r.track_condition == race.track_condition
        })
        .collect();
    if matching.is_empty() {
        return Sentinels::COLD_START;
    }
    matching.iter().filter(|r| r.placed()).count() as f64 / matching.len() as f64
}

/// Place rate restricted to prior races in the same distance band.
fn distance_affinity(runs: &[PastRun], race: &Race) -> f64 {
    let band = distance_band(race.distance);
    let matching: Vec<&PastRun> = runs
        .iter()
        .filter(|r| distance_band(r.distance) == band)
        .collect();
    if matching.is_empty() {
        return Sentinels::COLD_START;
    }
    matching.iter().filter(|r| r.placed()).count() as f64 / matching.len() as f64
}

/// Sprint / mile / intermediate / staying distance bands (meters).
fn distance_band(distance: u32) -> u8 {
    match distance {
        0..=1400 => 0,
        1401..=1800 => 1,
        1801..=2200 => 2,
        _ => 3,
    }
}

/// Target grade level minus the median level of prior races.
fn class_delta(runs: &[PastRun], race: &Race) -> f64 {
    if runs.is_empty() {
        return Sentinels::COLD_START;
    }
    let mut levels: Vec<f64> = runs.iter().map(|r| r.grade.level()).collect();
    levels.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = if levels.len() % 2 == 1 {
        levels[levels.len() / 2]
    } else {
        (levels[levels.len() / 2 - 1] + levels[levels.len() / 2]) / 2.0
    };
    race.grade.level() - median
}

fn days_since_last(runs: &[PastRun], post_time: DateTime<Utc>) -> f64 {
    match runs.last() {
        Some(run) => (post_time - run.start_time).num_days() as f64,
        None => Sentinels::DEBUT,
    }
}
