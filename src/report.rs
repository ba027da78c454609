//! Performance reporting over completed backtest runs.
//!
//! All figures derive from the run record alone. Void wagers are excluded
//! from staking and hit-rate figures, and unresolved races never enter the
//! denominator of anything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::simulator::{BacktestRun, RunStatus};

/// Per-month slice of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodBreakdown {
    /// Calendar month, `YYYY-MM`.
    pub period: String,
    pub wagers: u32,
    pub wins: u32,
    pub staked: f64,
    pub returned: f64,
}

impl PeriodBreakdown {
    pub fn profit(&self) -> f64 {
        self.returned - self.staked
    }

    pub fn roi(&self) -> f64 {
        if self.staked > 0.0 {
            self.profit() / self.staked
        } else {
            0.0
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.wagers > 0 {
            self.wins as f64 / self.wagers as f64
        } else {
            0.0
        }
    }
}

/// Aggregate performance of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub run_id: String,
    pub strategy: String,
    pub status: RunStatus,
    pub starting_bankroll: f64,
    pub final_bankroll: f64,
    pub profit: f64,
    /// Profit over non-void stake.
    pub roi: f64,
    /// Wins over settled (non-void) wagers.
    pub hit_rate: f64,
    /// Largest peak-to-trough bankroll decline, as a fraction of the peak.
    pub max_drawdown: f64,
    pub total_staked: f64,
    pub total_returned: f64,
    pub wager_count: u32,
    pub win_count: u32,
    pub void_count: u32,
    pub unresolved: u32,
    pub races_processed: u32,
    /// Run events, counted by kind.
    pub event_counts: BTreeMap<String, u32>,
    pub monthly: Vec<PeriodBreakdown>,
}

/// Report for a run: either a real summary or an explicit marker that no
/// wagers were settled, never a page of zeroes posing as results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum Report {
    NoWagersPlaced {
        run_id: String,
        strategy: String,
        races_processed: u32,
        unresolved: u32,
    },
    Summary(PerformanceSummary),
}

/// Summarize a run.
pub fn summarize(run: &BacktestRun) -> Report {
    let settled: Vec<_> = run.wagers.iter().filter(|w| !w.void).collect();
    if settled.is_empty() {
        return Report::NoWagersPlaced {
            run_id: run.id.clone(),
            strategy: run.strategy.clone(),
            races_processed: run.races_processed,
            unresolved: run.unresolved,
        };
    }

    let total_staked: f64 = settled.iter().map(|w| w.stake).sum();
    let total_returned: f64 = settled.iter().map(|w| w.payout).sum();
    let win_count = settled.iter().filter(|w| w.won).count() as u32;
    let void_count = run.wagers.iter().filter(|w| w.void).count() as u32;

    let mut event_counts: BTreeMap<String, u32> = BTreeMap::new();
    for event in &run.events {
        *event_counts.entry(event.kind_name().to_string()).or_insert(0) += 1;
    }

    let mut monthly: BTreeMap<String, PeriodBreakdown> = BTreeMap::new();
    for wager in &settled {
        let period = wager.placed_at.format("%Y-%m").to_string();
        let slot = monthly.entry(period.clone()).or_insert(PeriodBreakdown {
            period,
            wagers: 0,
            wins: 0,
            staked: 0.0,
            returned: 0.0,
        });
        slot.wagers += 1;
        if wager.won {
            slot.wins += 1;
        }
        slot.staked += wager.stake;
        slot.returned += wager.payout;
    }

    Report::Summary(PerformanceSummary {
        run_id: run.id.clone(),
        strategy: run.strategy.clone(),
        status: run.status,
        starting_bankroll: run.starting_bankroll,
        final_bankroll: run.final_bankroll,
        profit: run.final_bankroll - run.starting_bankroll,
        roi: if total_staked > 0.0 {
            (total_returned - total_staked) / total_staked
        } else {
            0.0
        },
        hit_rate: win_count as f64 / settled.len() as f64,
        max_drawdown: max_drawdown(&run.bankroll_trajectory),
        total_staked,
        total_returned,
        wager_count: settled.len() as u32,
        win_count,
        void_count,
        unresolved: run.unresolved,
        races_processed: run.races_processed,
        event_counts,
        monthly: monthly.into_values().collect(),
    })
}

/// Largest peak-to-trough decline over the trajectory, as a fraction of
/// the preceding peak. Zero for a monotone or empty trajectory.
fn max_drawdown(trajectory: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for &point in trajectory {
        if point > peak {
            peak = point;
        } else if peak > 0.0 {
            worst = worst.max((peak - point) / peak);
        }
    }
    worst
}

/// Print a report to stdout as a fixed-width table.
pub fn print_report_table(report: &Report) {
    match report {
        Report::NoWagersPlaced {
            run_id,
            strategy,
            races_processed,
            unresolved,
        } => {
            println!("Run {} ({}): no wagers placed", run_id, strategy);
            println!(
                "  races processed: {}  unresolved: {}",
                races_processed, unresolved
            );
        }
        Report::Summary(s) => {
            println!("Run {} ({}) [{:?}]", s.run_id, s.strategy, s.status);
            println!("{}", "-".repeat(68));
            println!(
                "  bankroll  {:>12.2} -> {:>12.2}  profit {:>+12.2}",
                s.starting_bankroll, s.final_bankroll, s.profit
            );
            println!(
                "  wagers {:>5}  wins {:>5}  voids {:>4}  hit rate {:>6.1}%",
                s.wager_count,
                s.win_count,
                s.void_count,
                s.hit_rate * 100.0
            );
            println!(
                "  staked {:>10.2}  returned {:>10.2}  ROI {:>+7.2}%  max DD {:>6.2}%",
                s.total_staked,
                s.total_returned,
                s.roi * 100.0,
                s.max_drawdown * 100.0
            );
            println!(
                "  races {:>5}  unresolved {:>4}",
                s.races_processed, s.unresolved
            );
            if !s.monthly.is_empty() {
                println!("{}", "-".repeat(68));
                println!(
                    "  {:<8} {:>7} {:>6} {:>11} {:>11} {:>8} {:>7}",
                    "month", "wagers", "wins", "staked", "returned", "ROI%", "hit%"
                );
                for m in &s.monthly {
                    println!(
                        "  {:<8} {:>7} {:>6} {:>11.2} {:>11.2} {:>+8.2} {:>7.1}",
                        m.period,
                        m.wagers,
                        m.wins,
                        m.staked,
                        m.returned,
                        m.roi() * 100.0,
                        m.hit_rate() * 100.0
                    );
                }
            }
            println!("{}", "-".repeat(68));
        }
    }
}
