//! Engine facade tying ingestion, prediction, and simulation together.
//!
//! The engine owns the entity store and the scoring function. Persistence
//! of runs is the caller's concern; the engine itself is deterministic:
//! the same ingested data and the same request always produce the same
//! run, byte for byte.

use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::entities::EntityStore;
use crate::error::EngineError;
use crate::features::FeatureBuilder;
use crate::history::HistorySnapshot;
use crate::ingest::RawRecord;
use crate::normalizer::{normalize_batch, RejectedRecord};
use crate::predictor::{predict_race, Prediction, Scorer};
use crate::simulator::{BacktestRun, CancelToken, DateRange, Simulator};
use crate::strategy::StrategySpec;

/// Outcome of one ingestion batch.
#[derive(Debug)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejections: Vec<RejectedRecord>,
}

pub struct Engine {
    store: EntityStore,
    scorer: Arc<dyn Scorer>,
    config: AppConfig,
}

impl Engine {
    pub fn new(config: AppConfig, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            store: EntityStore::new(),
            scorer,
            config,
        }
    }

    pub fn race_count(&self) -> usize {
        self.store.race_count()
    }

    /// Normalize a batch of raw records into the store. Rejections are
    /// per record and never abort the batch.
    pub fn ingest(&mut self, records: &[RawRecord]) -> IngestSummary {
        let batch = normalize_batch(records, &self.store);
        let accepted = batch.accepted_count();
        let rejections = batch.apply(&mut self.store);
        info!(
            accepted,
            rejected = rejections.len(),
            races = self.store.race_count(),
            superseded = self.store.superseded_count(),
            "ingested batch"
        );
        IngestSummary {
            accepted,
            rejections,
        }
    }

    /// Ranked win probabilities for one race, computed from history
    /// strictly before its post time.
    pub fn predictions(&self, race_id: &str) -> Result<Vec<Prediction>, EngineError> {
        let race = self
            .store
            .race(race_id)
            .ok_or_else(|| EngineError::RaceNotFound(race_id.to_string()))?;
        let runners = self.store.runners(race_id);

        let snapshot = HistorySnapshot::build(&self.store);
        let view = snapshot.before(race.start_time);
        let features =
            FeatureBuilder::new(self.config.features.clone()).build_race(race, runners, &view)?;
        predict_race(race, runners, &features, self.scorer.as_ref())
    }

    /// Run a backtest over `[start_date, end_date]` (whole days, inclusive).
    pub fn run_backtest(
        &self,
        spec: &StrategySpec,
        start_date: NaiveDate,
        end_date: NaiveDate,
        starting_bankroll: Option<f64>,
        cancel: &CancelToken,
    ) -> Result<BacktestRun, EngineError> {
        let strategy = spec.build()?;
        let simulator = Simulator::new(
            &self.store,
            self.scorer.as_ref(),
            FeatureBuilder::new(self.config.features.clone()),
            self.config.simulation.place_paid_positions,
        );
        let range = day_bounds(start_date, end_date);
        let bankroll = starting_bankroll.unwrap_or(self.config.simulation.starting_bankroll);
        Ok(simulator.run(strategy.as_ref(), range, bankroll, cancel))
    }
}

/// Midnight-to-midnight UTC bounds covering both dates in full.
fn day_bounds(start_date: NaiveDate, end_date: NaiveDate) -> DateRange {
    DateRange {
        start: start_date.and_time(NaiveTime::MIN).and_utc(),
        end: (end_date + chrono::Duration::days(1))
            .and_time(NaiveTime::MIN)
            .and_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{RecordKind, Scalar};
    use crate::predictor::FormScorer;
    use crate::strategy::StrategyParams;

    fn race_record(id: &str, day: u32) -> RawRecord {
        RawRecord::new(RecordKind::Race)
            .with("race_id", Scalar::Text(id.to_string()))
            .with("track", Scalar::Text("Tokyo".to_string()))
            .with(
                "start_time",
                Scalar::Text(format!("2024-03-{:02}T06:00:00Z", day)),
            )
            .with("surface", Scalar::Text("turf".to_string()))
            .with("track_condition", Scalar::Text("good".to_string()))
            .with("distance", Scalar::Integer(1600))
            .with("grade", Scalar::Text("OP".to_string()))
    }

    fn runner_record(race_id: &str, post: i64) -> RawRecord {
        RawRecord::new(RecordKind::Runner)
            .with("race_id", Scalar::Text(race_id.to_string()))
            .with("post_position", Scalar::Integer(post))
            .with("horse_id", Scalar::Text(format!("H{}", post)))
            .with("jockey_id", Scalar::Text(format!("J{}", post)))
            .with("weight_carried", Scalar::Number(56.0))
    }

    fn odds_record(race_id: &str, post: i64, day: u32, win: f64) -> RawRecord {
        RawRecord::new(RecordKind::OddsSnapshot)
            .with("race_id", Scalar::Text(race_id.to_string()))
            .with("post_position", Scalar::Integer(post))
            .with("at", Scalar::Text(format!("2024-03-{:02}T05:00:00Z", day)))
            .with("win_price", Scalar::Number(win))
    }

    fn result_record(race_id: &str, post: i64, position: i64, win_payout: Option<f64>) -> RawRecord {
        let mut record = RawRecord::new(RecordKind::Result)
            .with("race_id", Scalar::Text(race_id.to_string()))
            .with("post_position", Scalar::Integer(post))
            .with("position", Scalar::Integer(position))
            .with("margin", Scalar::Number((position - 1) as f64));
        if let Some(payout) = win_payout {
            record = record.with("win_payout", Scalar::Number(payout));
        }
        record
    }

    fn loaded_engine() -> Engine {
        let mut engine = Engine::new(AppConfig::default(), Arc::new(FormScorer));
        let mut records = Vec::new();
        for day in 1..=4u32 {
            let id = format!("R{}", day);
            records.push(race_record(&id, day));
            for post in 1..=3i64 {
                records.push(runner_record(&id, post));
                records.push(odds_record(&id, post, day, 2.0 + post as f64));
            }
            // Day 4 stays unresolved.
            if day < 4 {
                for post in 1..=3i64 {
                    let position = ((post as u32 + day) % 3 + 1) as i64;
                    let payout = (position == 1).then_some(2.0 + post as f64);
                    records.push(result_record(&id, post, position, payout));
                }
            }
        }
        let summary = engine.ingest(&records);
        assert!(summary.rejections.is_empty());
        engine
    }

    fn spec() -> StrategySpec {
        StrategySpec {
            name: "favorite".to_string(),
            params: StrategyParams::default(),
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_predictions_for_known_race() {
        let engine = loaded_engine();
        let predictions = engine.predictions("R4").unwrap();
        assert_eq!(predictions.len(), 3);
        let sum: f64 = predictions.iter().map(|p| p.probability).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(predictions[0].rank, 1);
    }

    #[test]
    fn test_predictions_unknown_race() {
        let engine = loaded_engine();
        assert!(matches!(
            engine.predictions("R99").unwrap_err(),
            EngineError::RaceNotFound(_)
        ));
    }

    #[test]
    fn test_backtest_covers_range_and_counts_unresolved() {
        let engine = loaded_engine();
        let run = engine
            .run_backtest(&spec(), date(1), date(4), None, &CancelToken::new())
            .unwrap();
        assert_eq!(run.races_processed, 4);
        assert_eq!(run.unresolved, 1);
        assert_eq!(run.starting_bankroll, 1000.0);
    }

    #[test]
    fn test_backtest_is_deterministic() {
        let engine = loaded_engine();
        let first = engine
            .run_backtest(&spec(), date(1), date(4), None, &CancelToken::new())
            .unwrap();
        let second = engine
            .run_backtest(&spec(), date(1), date(4), None, &CancelToken::new())
            .unwrap();

        let a = serde_json::to_string(&first).unwrap();
        let b = serde_json::to_string(&second).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_strategy_different_params_persist_separately() {
        let engine = loaded_engine();
        let run_a = engine
            .run_backtest(&spec(), date(1), date(4), None, &CancelToken::new())
            .unwrap();
        let heavier = StrategySpec {
            name: "favorite".to_string(),
            params: StrategyParams {
                stake: 20.0,
                ..StrategyParams::default()
            },
        };
        let run_b = engine
            .run_backtest(&heavier, date(1), date(4), None, &CancelToken::new())
            .unwrap();
        assert_ne!(run_a.id, run_b.id);

        let mut repository = crate::storage::RunRepository::in_memory().unwrap();
        repository.save_run(&run_a).unwrap();
        repository.save_run(&run_b).unwrap();
        assert_eq!(repository.list_runs().unwrap().len(), 2);
    }

    #[test]
    fn test_ingest_reports_rejections() {
        let mut engine = Engine::new(AppConfig::default(), Arc::new(FormScorer));
        let records = vec![
            race_record("R1", 1),
            // Runner referencing an unknown race.
            runner_record("R9", 1),
        ];
        let summary = engine.ingest(&records);
        assert_eq!(summary.rejections.len(), 1);
        assert_eq!(engine.race_count(), 1);
    }

    #[test]
    fn test_day_bounds_cover_end_date() {
        let range = day_bounds(date(1), date(2));
        assert_eq!(range.start.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(range.end.to_rfc3339(), "2024-03-03T00:00:00+00:00");
    }
}
