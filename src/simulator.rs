//! Chronological backtest simulator.
//!
//! Replays races in start-time order against a strategy. Each race sees
//! only odds taken at or before its post time and history that ended
//! strictly before it. Recoverable conditions become run events; temporal
//! violations and bankroll breaches abort the run in place, keeping the
//! partial record of everything settled up to that point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entities::{EntityStore, Race};
use crate::error::EngineError;
use crate::features::FeatureBuilder;
use crate::history::HistorySnapshot;
use crate::predictor::{predict_race, Scorer};
use crate::strategy::{BetKind, DeadHeatPolicy, PostOdds, Strategy, StrategyParams, VoidPolicy};

/// Lifecycle of a backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Initialized,
    Running,
    Completed,
    Aborted,
}

/// Something noteworthy that happened during a run, attached to the run
/// record for the report to count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimEvent {
    /// Race inside the range with no official result: no wagers placed,
    /// excluded from performance figures.
    Unresolved { race_id: String },
    /// Race could not be predicted; skipped without betting.
    SkippedPrediction { race_id: String, reason: String },
    /// Strategy asked for an invalid or unquotable stake.
    StakeRejected {
        race_id: String,
        post_position: u8,
        requested: f64,
    },
    /// Stake exceeded the per-wager cap and was clamped down to it.
    StakeCapped {
        race_id: String,
        post_position: u8,
        requested: f64,
        clamped: f64,
    },
    /// Stake exceeded the available bankroll.
    InsufficientBankroll {
        race_id: String,
        post_position: u8,
        requested: f64,
    },
    /// Runner absent from the official result; settled per void policy.
    VoidWager { race_id: String, post_position: u8 },
    /// Temporal or bankroll invariant breach. The run stops at this race
    /// with everything settled so far intact.
    InvariantViolation { race_id: String, detail: String },
}

impl SimEvent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SimEvent::Unresolved { .. } => "unresolved",
            SimEvent::SkippedPrediction { .. } => "skipped_prediction",
            SimEvent::StakeRejected { .. } => "stake_rejected",
            SimEvent::StakeCapped { .. } => "stake_capped",
            SimEvent::InsufficientBankroll { .. } => "insufficient_bankroll",
            SimEvent::VoidWager { .. } => "void_wager",
            SimEvent::InvariantViolation { .. } => "invariant_violation",
        }
    }
}

/// One settled (or voided) wager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerRecord {
    pub race_id: String,
    pub post_position: u8,
    pub horse_id: String,
    pub kind: BetKind,
    pub stake: f64,
    /// Settlement price: official payout when published, otherwise the
    /// last pre-post quote.
    pub price: f64,
    /// Total return credited, stake included. Zero for a losing wager.
    pub payout: f64,
    pub won: bool,
    pub void: bool,
    pub bankroll_after: f64,
    /// Post time of the race the wager was placed on.
    pub placed_at: DateTime<Utc>,
}

/// Simulated date range, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Complete record of one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: String,
    pub strategy: String,
    pub params: crate::strategy::StrategyParams,
    pub range: DateRange,
    pub starting_bankroll: f64,
    pub final_bankroll: f64,
    pub status: RunStatus,
    pub wagers: Vec<WagerRecord>,
    /// Bankroll after each processed race, starting bankroll first.
    pub bankroll_trajectory: Vec<f64>,
    pub events: Vec<SimEvent>,
    pub unresolved: u32,
    pub races_processed: u32,
}

/// Cooperative cancellation flag, checked between races.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives a strategy over a store of races.
pub struct Simulator<'a> {
    store: &'a EntityStore,
    scorer: &'a dyn Scorer,
    features: FeatureBuilder,
    /// Finishing positions that pay a place bet.
    place_paid_positions: u32,
}

impl<'a> Simulator<'a> {
    pub fn new(
        store: &'a EntityStore,
        scorer: &'a dyn Scorer,
        features: FeatureBuilder,
        place_paid_positions: u32,
    ) -> Self {
        Self {
            store,
            scorer,
            features,
            place_paid_positions,
        }
    }

    /// Replay all races in `range` chronologically against `strategy`.
    ///
    /// The run identifier is derived from the strategy name, its parameter
    /// set, and the range, so rerunning the same configuration produces the
    /// same id while a parameter change always gets a fresh one.
    pub fn run(
        &self,
        strategy: &dyn Strategy,
        range: DateRange,
        starting_bankroll: f64,
        cancel: &CancelToken,
    ) -> BacktestRun {
        let mut run = BacktestRun {
            id: run_id(strategy.name(), strategy.params(), range),
            strategy: strategy.name().to_string(),
            params: strategy.params().clone(),
            range,
            starting_bankroll,
            final_bankroll: starting_bankroll,
            status: RunStatus::Running,
            wagers: Vec::new(),
            bankroll_trajectory: vec![starting_bankroll],
            events: Vec::new(),
            unresolved: 0,
            races_processed: 0,
        };
        let snapshot = HistorySnapshot::build(self.store);
        let mut bankroll = starting_bankroll;

        info!(
            run_id = %run.id,
            strategy = %run.strategy,
            scorer = self.scorer.name(),
            "starting backtest"
        );

        for race in self.store.races_between(range.start, range.end) {
            if cancel.is_cancelled() {
                warn!(run_id = %run.id, "backtest cancelled");
                run.status = RunStatus::Aborted;
                run.final_bankroll = bankroll;
                return run;
            }
            run.races_processed += 1;

            let result = match self.store.result(&race.race_id) {
                Some(r) => r,
                None => {
                    run.unresolved += 1;
                    run.events.push(SimEvent::Unresolved {
                        race_id: race.race_id.clone(),
                    });
                    run.bankroll_trajectory.push(bankroll);
                    continue;
                }
            };

            let runners = self.store.runners(&race.race_id);
            let view = snapshot.before(race.start_time);
            let predictions = match self
                .features
                .build_race(race, runners, &view)
                .and_then(|features| predict_race(race, runners, &features, self.scorer))
            {
                Ok(p) => p,
                Err(EngineError::TemporalViolation(detail)) => {
                    warn!(run_id = %run.id, race_id = %race.race_id, "temporal violation");
                    finalize_aborted(
                        &mut run,
                        bankroll,
                        SimEvent::InvariantViolation {
                            race_id: race.race_id.clone(),
                            detail,
                        },
                    );
                    return run;
                }
                Err(e) => {
                    debug!(race_id = %race.race_id, error = %e, "skipping race");
                    run.events.push(SimEvent::SkippedPrediction {
                        race_id: race.race_id.clone(),
                        reason: e.to_string(),
                    });
                    run.bankroll_trajectory.push(bankroll);
                    continue;
                }
            };

            let odds = self.odds_at_post_time(race);
            let intents = strategy.decide(&predictions, &odds, bankroll);

            for intent in intents {
                let requested = intent.stake;
                if !requested.is_finite() || requested <= 0.0 {
                    run.events.push(SimEvent::StakeRejected {
                        race_id: race.race_id.clone(),
                        post_position: intent.post_position,
                        requested,
                    });
                    continue;
                }
                let quote = match odds.get(&intent.post_position) {
                    Some(q) => *q,
                    None => {
                        run.events.push(SimEvent::StakeRejected {
                            race_id: race.race_id.clone(),
                            post_position: intent.post_position,
                            requested,
                        });
                        continue;
                    }
                };
                // Place wagers need a place price to settle against when
                // the official payout is missing.
                let quote_price = match intent.kind {
                    BetKind::Win => quote.win,
                    BetKind::Place => match quote.place {
                        Some(p) => p,
                        None => {
                            run.events.push(SimEvent::StakeRejected {
                                race_id: race.race_id.clone(),
                                post_position: intent.post_position,
                                requested,
                            });
                            continue;
                        }
                    },
                };

                let cap = bankroll * strategy.params().stake_cap_fraction;
                let mut stake = requested;
                if stake > cap {
                    if strategy.params().auto_clamp {
                        run.events.push(SimEvent::StakeCapped {
                            race_id: race.race_id.clone(),
                            post_position: intent.post_position,
                            requested,
                            clamped: cap,
                        });
                        stake = cap;
                    } else {
                        run.events.push(SimEvent::StakeRejected {
                            race_id: race.race_id.clone(),
                            post_position: intent.post_position,
                            requested,
                        });
                        continue;
                    }
                }
                if stake > bankroll {
                    run.events.push(SimEvent::InsufficientBankroll {
                        race_id: race.race_id.clone(),
                        post_position: intent.post_position,
                        requested: stake,
                    });
                    continue;
                }

                bankroll -= stake;

                let horse_id = runners
                    .iter()
                    .find(|r| r.post_position == intent.post_position)
                    .map(|r| r.horse_id.clone())
                    .unwrap_or_default();

                let record = match result.placing_for(intent.post_position) {
                    None => {
                        run.events.push(SimEvent::VoidWager {
                            race_id: race.race_id.clone(),
                            post_position: intent.post_position,
                        });
                        let payout = match strategy.params().void {
                            VoidPolicy::Refund => stake,
                            VoidPolicy::Lose => 0.0,
                        };
                        bankroll += payout;
                        WagerRecord {
                            race_id: race.race_id.clone(),
                            post_position: intent.post_position,
                            horse_id,
                            kind: intent.kind,
                            stake,
                            price: quote_price,
                            payout,
                            won: false,
                            void: true,
                            bankroll_after: bankroll,
                            placed_at: race.start_time,
                        }
                    }
                    Some(placing) => {
                        let won = match intent.kind {
                            BetKind::Win => placing.position == 1,
                            BetKind::Place => placing.position <= self.place_paid_positions,
                        };
                        let price = match intent.kind {
                            BetKind::Win => placing.win_payout.unwrap_or(quote_price),
                            BetKind::Place => placing.place_payout.unwrap_or(quote_price),
                        };
                        let mut payout = if won { stake * price } else { 0.0 };
                        if won && result.dead_heat {
                            let sharers = result.shared_rank_count(placing.position);
                            if sharers > 1
                                && strategy.params().dead_heat == DeadHeatPolicy::SplitPayout
                            {
                                payout /= sharers as f64;
                            }
                        }
                        bankroll += payout;
                        WagerRecord {
                            race_id: race.race_id.clone(),
                            post_position: intent.post_position,
                            horse_id,
                            kind: intent.kind,
                            stake,
                            price,
                            payout,
                            won,
                            void: false,
                            bankroll_after: bankroll,
                            placed_at: race.start_time,
                        }
                    }
                };
                run.wagers.push(record);

                if bankroll < 0.0 {
                    warn!(run_id = %run.id, race_id = %race.race_id, bankroll, "bankroll breach");
                    finalize_aborted(
                        &mut run,
                        bankroll,
                        SimEvent::InvariantViolation {
                            race_id: race.race_id.clone(),
                            detail: format!("bankroll went negative: {}", bankroll),
                        },
                    );
                    return run;
                }
            }

            run.bankroll_trajectory.push(bankroll);
        }

        run.status = RunStatus::Completed;
        run.final_bankroll = bankroll;
        info!(
            run_id = %run.id,
            final_bankroll = bankroll,
            wagers = run.wagers.len(),
            "backtest completed"
        );
        run
    }

    /// Last quotes at or before the race's post time, per post position.
    fn odds_at_post_time(&self, race: &Race) -> BTreeMap<u8, PostOdds> {
        let mut odds = BTreeMap::new();
        for runner in self.store.runners(&race.race_id) {
            if let Some(snap) =
                self.store
                    .odds_at_or_before(&race.race_id, runner.post_position, race.start_time)
            {
                odds.insert(
                    runner.post_position,
                    PostOdds {
                        win: snap.win_price,
                        place: snap.place_price,
                    },
                );
            }
        }
        odds
    }
}

/// Stop a run mid-flight, keeping everything settled so far.
fn finalize_aborted(run: &mut BacktestRun, bankroll: f64, event: SimEvent) {
    run.events.push(event);
    run.status = RunStatus::Aborted;
    run.final_bankroll = bankroll;
}

fn run_id(strategy: &str, params: &StrategyParams, range: DateRange) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", params).as_bytes());
    let digest = hasher.finalize();
    format!(
        "{}-{:02x}{:02x}{:02x}{:02x}-{}-{}",
        strategy,
        digest[0],
        digest[1],
        digest[2],
        digest[3],
        range.start.format("%Y%m%dT%H%M%S"),
        range.end.format("%Y%m%dT%H%M%S")
    )
}
