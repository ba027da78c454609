//! Betting strategies: pure decision policies over predictions and odds.
//!
//! A strategy owns no mutable state between races. Its decision function
//! sees only the ranked predictions, the odds known at post time, and the
//! current bankroll, and returns zero or more wager intents. Stake caps
//! and bankroll checks are enforced by the simulator, not here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::betting::{calculate_ev, kelly_stake};
use crate::error::EngineError;
use crate::predictor::Prediction;

/// Supported bet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetKind {
    #[default]
    Win,
    Place,
}

/// How a winning wager pays out when runners dead-heat for the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadHeatPolicy {
    /// Payout divided by the number of runners sharing the rank.
    #[default]
    SplitPayout,
    FullPayout,
}

/// What happens to a wager on a runner absent from the official result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidPolicy {
    /// Stake returned; the wager does not count toward hit rate.
    #[default]
    Refund,
    Lose,
}

/// Static strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Flat stake per wager (also the floor for Kelly-sized stakes).
    #[serde(default = "default_stake")]
    pub stake: f64,
    /// Maximum stake as a fraction of the current bankroll.
    #[serde(default = "default_stake_cap_fraction")]
    pub stake_cap_fraction: f64,
    /// Clamp oversized stakes to the cap instead of rejecting them.
    #[serde(default)]
    pub auto_clamp: bool,
    /// Minimum expected value for the value strategy.
    #[serde(default = "default_min_edge")]
    pub min_edge: f64,
    /// Fraction of full Kelly for value stakes.
    #[serde(default = "default_kelly_multiplier")]
    pub kelly_multiplier: f64,
    /// Minimum win price for the longshot strategy.
    #[serde(default = "default_min_longshot_price")]
    pub min_longshot_price: f64,
    #[serde(default)]
    pub bet_kind: BetKind,
    #[serde(default)]
    pub dead_heat: DeadHeatPolicy,
    #[serde(default)]
    pub void: VoidPolicy,
}

fn default_stake() -> f64 {
    10.0
}

fn default_stake_cap_fraction() -> f64 {
    0.05
}

fn default_min_edge() -> f64 {
    1.0
}

fn default_kelly_multiplier() -> f64 {
    0.25
}

fn default_min_longshot_price() -> f64 {
    10.0
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            stake: default_stake(),
            stake_cap_fraction: default_stake_cap_fraction(),
            auto_clamp: false,
            min_edge: default_min_edge(),
            kelly_multiplier: default_kelly_multiplier(),
            min_longshot_price: default_min_longshot_price(),
            bet_kind: BetKind::default(),
            dead_heat: DeadHeatPolicy::default(),
            void: VoidPolicy::default(),
        }
    }
}

/// Odds known for one runner at post time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostOdds {
    pub win: f64,
    pub place: Option<f64>,
}

/// A wager the strategy wants to place. Validated by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerIntent {
    pub post_position: u8,
    pub kind: BetKind,
    pub stake: f64,
}

/// A betting policy: one pure decision method plus static configuration.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn params(&self) -> &StrategyParams;

    fn decide(
        &self,
        predictions: &[Prediction],
        odds: &BTreeMap<u8, PostOdds>,
        bankroll: f64,
    ) -> Vec<WagerIntent>;
}

/// Flat stake on the market favorite (lowest win price, ties to the
/// lowest post position).
#[derive(Debug)]
pub struct FavoriteStrategy {
    params: StrategyParams,
}

impl FavoriteStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

impl Strategy for FavoriteStrategy {
    fn name(&self) -> &'static str {
        "favorite"
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn decide(
        &self,
        _predictions: &[Prediction],
        odds: &BTreeMap<u8, PostOdds>,
        _bankroll: f64,
    ) -> Vec<WagerIntent> {
        let mut favorite: Option<(u8, f64)> = None;
        for (&post, quote) in odds {
            // Strictly-less keeps the lowest post on a tie.
            if favorite.map_or(true, |(_, best)| quote.win < best) {
                favorite = Some((post, quote.win));
            }
        }
        match favorite {
            Some((post, _)) => vec![WagerIntent {
                post_position: post,
                kind: self.params.bet_kind,
                stake: self.params.stake,
            }],
            None => Vec::new(),
        }
    }
}

/// Flat stake on the longest-priced runner at or above the configured
/// minimum price.
#[derive(Debug)]
pub struct LongshotStrategy {
    params: StrategyParams,
}

impl LongshotStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

impl Strategy for LongshotStrategy {
    fn name(&self) -> &'static str {
        "longshot"
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn decide(
        &self,
        _predictions: &[Prediction],
        odds: &BTreeMap<u8, PostOdds>,
        _bankroll: f64,
    ) -> Vec<WagerIntent> {
        let mut pick: Option<(u8, f64)> = None;
        for (&post, quote) in odds {
            if quote.win < self.params.min_longshot_price {
                continue;
            }
            if pick.map_or(true, |(_, best)| quote.win > best) {
                pick = Some((post, quote.win));
            }
        }
        match pick {
            Some((post, _)) => vec![WagerIntent {
                post_position: post,
                kind: self.params.bet_kind,
                stake: self.params.stake,
            }],
            None => Vec::new(),
        }
    }
}

/// Kelly-sized stake on the best expected-value runner, when its EV
/// clears the configured edge threshold.
#[derive(Debug)]
pub struct ValueStrategy {
    params: StrategyParams,
}

impl ValueStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }
}

impl Strategy for ValueStrategy {
    fn name(&self) -> &'static str {
        "value"
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn decide(
        &self,
        predictions: &[Prediction],
        odds: &BTreeMap<u8, PostOdds>,
        bankroll: f64,
    ) -> Vec<WagerIntent> {
        let mut best: Option<(u8, f64, f64, f64)> = None; // post, ev, prob, price
        for prediction in predictions {
            let quote = match odds.get(&prediction.post_position) {
                Some(q) => q,
                None => continue,
            };
            let ev = calculate_ev(prediction.probability, quote.win);
            if ev <= self.params.min_edge {
                continue;
            }
            if best.map_or(true, |(_, best_ev, _, _)| ev > best_ev) {
                best = Some((prediction.post_position, ev, prediction.probability, quote.win));
            }
        }
        match best {
            Some((post, _, probability, price)) => {
                let stake = kelly_stake(probability, price, bankroll, self.params.kelly_multiplier)
                    .max(self.params.stake);
                vec![WagerIntent {
                    post_position: post,
                    kind: self.params.bet_kind,
                    stake,
                }]
            }
            None => Vec::new(),
        }
    }
}

/// Named strategy plus parameters, as configured by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    #[serde(default)]
    pub params: StrategyParams,
}

impl StrategySpec {
    pub fn build(&self) -> Result<Box<dyn Strategy>, EngineError> {
        match self.name.to_lowercase().as_str() {
            "favorite" => Ok(Box::new(FavoriteStrategy::new(self.params.clone()))),
            "longshot" => Ok(Box::new(LongshotStrategy::new(self.params.clone()))),
            "value" => Ok(Box::new(ValueStrategy::new(self.params.clone()))),
            other => Err(EngineError::UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(win: f64) -> PostOdds {
        PostOdds { win, place: None }
    }

    fn prediction(post: u8, probability: f64) -> Prediction {
        Prediction {
            race_id: "R1".to_string(),
            post_position: post,
            horse_id: format!("H{}", post),
            probability,
            rank: 0,
        }
    }

    #[test]
    fn test_favorite_picks_lowest_price() {
        let odds: BTreeMap<u8, PostOdds> =
            [(1, quote(4.0)), (2, quote(2.0)), (3, quote(9.0))].into();
        let strategy = FavoriteStrategy::new(StrategyParams::default());
        let intents = strategy.decide(&[], &odds, 1000.0);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].post_position, 2);
        assert_eq!(intents[0].stake, 10.0);
    }

    #[test]
    fn test_favorite_tie_goes_to_lowest_post() {
        let odds: BTreeMap<u8, PostOdds> = [(3, quote(2.0)), (5, quote(2.0))].into();
        let strategy = FavoriteStrategy::new(StrategyParams::default());
        let intents = strategy.decide(&[], &odds, 1000.0);
        assert_eq!(intents[0].post_position, 3);
    }

    #[test]
    fn test_favorite_no_odds_no_bet() {
        let strategy = FavoriteStrategy::new(StrategyParams::default());
        assert!(strategy.decide(&[], &BTreeMap::new(), 1000.0).is_empty());
    }

    #[test]
    fn test_longshot_respects_minimum_price() {
        let odds: BTreeMap<u8, PostOdds> =
            [(1, quote(2.0)), (2, quote(8.0)), (3, quote(21.0))].into();
        let strategy = LongshotStrategy::new(StrategyParams::default());
        let intents = strategy.decide(&[], &odds, 1000.0);
        assert_eq!(intents[0].post_position, 3);

        // Nothing at or above the minimum: no bet.
        let short_odds: BTreeMap<u8, PostOdds> = [(1, quote(2.0)), (2, quote(8.0))].into();
        assert!(strategy.decide(&[], &short_odds, 1000.0).is_empty());
    }

    #[test]
    fn test_value_bets_best_edge_only() {
        let odds: BTreeMap<u8, PostOdds> =
            [(1, quote(2.0)), (2, quote(12.0)), (3, quote(50.0))].into();
        let predictions = vec![
            prediction(1, 0.40), // EV 0.8
            prediction(2, 0.15), // EV 1.8
            prediction(3, 0.03), // EV 1.5
        ];
        let strategy = ValueStrategy::new(StrategyParams::default());
        let intents = strategy.decide(&predictions, &odds, 1000.0);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].post_position, 2);
        assert!(intents[0].stake >= 10.0);
    }

    #[test]
    fn test_value_no_edge_no_bet() {
        let odds: BTreeMap<u8, PostOdds> = [(1, quote(2.0))].into();
        let predictions = vec![prediction(1, 0.3)]; // EV 0.6
        let strategy = ValueStrategy::new(StrategyParams::default());
        assert!(strategy.decide(&predictions, &odds, 1000.0).is_empty());
    }

    #[test]
    fn test_spec_builds_known_strategies() {
        for name in ["favorite", "longshot", "value"] {
            let spec = StrategySpec {
                name: name.to_string(),
                params: StrategyParams::default(),
            };
            assert_eq!(spec.build().unwrap().name(), name);
        }
    }

    #[test]
    fn test_spec_rejects_unknown_strategy() {
        let spec = StrategySpec {
            name: "martingale".to_string(),
            params: StrategyParams::default(),
        };
        assert!(matches!(
            spec.build().unwrap_err(),
            EngineError::UnknownStrategy(_)
        ));
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let spec: StrategySpec = serde_json::from_str(r#"{"name": "favorite"}"#).unwrap();
        assert_eq!(spec.params.stake, 10.0);
        assert_eq!(spec.params.dead_heat, DeadHeatPolicy::SplitPayout);
        assert_eq!(spec.params.void, VoidPolicy::Refund);
        assert!(!spec.params.auto_clamp);
    }
}
