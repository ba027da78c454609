//! Prediction engine: scores feature vectors with a caller-supplied scoring
//! function and normalizes them into a probability distribution per race.
//!
//! The scoring function is a black box; the engine never trains or mutates
//! it. Ranks are deterministic: ties break by lowest post position, then by
//! horse identifier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entities::{Race, Runner};
use crate::error::EngineError;
use crate::features::{FeatureVector, Sentinels};

/// A pure scoring function: feature vector in, raw real-valued score out.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &FeatureVector) -> f64;

    fn name(&self) -> &'static str {
        "scorer"
    }
}

/// Deterministic baseline scorer built from form features.
///
/// Weighted sum of recent form, riding form, and course affinity, with a
/// penalty for stepping up in class. Cold-start sentinels contribute
/// nothing instead of dragging the score to an extreme.
pub struct FormScorer;

impl FormScorer {
    fn observed(value: f64) -> f64 {
        if FeatureVector::is_cold(value) || value == Sentinels::DEBUT {
            0.0
        } else {
            value
        }
    }
}

impl Scorer for FormScorer {
    fn score(&self, features: &FeatureVector) -> f64 {
        let mut score = 0.0;
        score += 2.0 * Self::observed(features.horse_win_rate);
        score += 1.0 * Self::observed(features.horse_place_rate);
        score += 0.8 * Self::observed(features.jockey_win_rate);
        score += 0.5 * Self::observed(features.track_affinity);
        score += 0.4 * Self::observed(features.distance_affinity);
        score -= 0.25 * Self::observed(features.class_delta);
        // Recent margins: close finishes beat distant ones.
        let margin = features.horse_avg_margin;
        if !FeatureVector::is_cold(margin) {
            score -= 0.05 * margin;
        }
        score
    }

    fn name(&self) -> &'static str {
        "form"
    }
}

/// Win probability and rank for one runner in one race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub race_id: String,
    pub post_position: u8,
    pub horse_id: String,
    pub probability: f64,
    /// 1 = highest probability.
    pub rank: u32,
}

/// Score every runner and normalize into a probability distribution.
///
/// Probabilities sum to 1 within 1e-6 for any field size >= 1. Fails with
/// `EmptyRace` for zero runners and `IncompleteFeatureSet` when a runner
/// has no feature vector or a non-finite feature family.
pub fn predict_race(
    race: &Race,
    runners: &[Runner],
    features: &BTreeMap<u8, FeatureVector>,
    scorer: &dyn Scorer,
) -> Result<Vec<Prediction>, EngineError> {
    if runners.is_empty() {
        return Err(EngineError::EmptyRace(race.race_id.clone()));
    }

    let mut scored: Vec<(&Runner, f64)> = Vec::with_capacity(runners.len());
    for runner in runners {
        let fv = features.get(&runner.post_position).ok_or_else(|| {
            EngineError::IncompleteFeatureSet {
                race_id: race.race_id.clone(),
                post_position: runner.post_position,
            }
        })?;
        if !fv.is_complete() {
            return Err(EngineError::IncompleteFeatureSet {
                race_id: race.race_id.clone(),
                post_position: runner.post_position,
            });
        }
        scored.push((runner, scorer.score(fv)));
    }

    let probabilities = softmax(scored.iter().map(|(_, s)| *s));

    let mut predictions: Vec<Prediction> = scored
        .iter()
        .zip(probabilities)
        .map(|((runner, _), probability)| Prediction {
            race_id: race.race_id.clone(),
            post_position: runner.post_position,
            horse_id: runner.horse_id.clone(),
            probability,
            rank: 0,
        })
        .collect();

    // Highest probability first; ties by lowest post, then horse id.
    predictions.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.post_position.cmp(&b.post_position))
            .then_with(|| a.horse_id.cmp(&b.horse_id))
    });
    for (i, prediction) in predictions.iter_mut().enumerate() {
        prediction.rank = (i + 1) as u32;
    }

    Ok(predictions)
}

/// Numerically stable softmax.
fn softmax(scores: impl Iterator<Item = f64> + Clone) -> Vec<f64> {
    let max = scores
        .clone()
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Grade, Surface, TrackCondition};
    use chrono::{TimeZone, Utc};

    struct FixedScorer(BTreeMap<u8, f64>);

    impl Scorer for FixedScorer {
        fn score(&self, features: &FeatureVector) -> f64 {
            // Post position smuggled through weight for test purposes.
            self.0[&(features.days_since_last as u8)]
        }
    }

    fn test_race(id: &str) -> Race {
        Race {
            race_id: id.to_string(),
            track: "Kyoto".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
            surface: Surface::Turf,
            track_condition: TrackCondition::Good,
            distance: 1600,
            grade: Grade::Open,
        }
    }

    fn test_runner(post: u8) -> Runner {
        Runner {
            race_id: "R1".to_string(),
            post_position: post,
            horse_id: format!("H{}", post),
            jockey_id: format!("J{}", post),
            weight_carried: 56.0,
        }
    }

    fn flat_features(post: u8) -> FeatureVector {
        FeatureVector {
            horse_win_rate: 0.2,
            horse_place_rate: 0.5,
            horse_avg_margin: 1.0,
            jockey_win_rate: 0.1,
            track_affinity: 0.3,
            distance_affinity: 0.4,
            class_delta: 0.0,
            days_since_last: post as f64,
        }
    }

    fn feature_map(posts: &[u8]) -> BTreeMap<u8, FeatureVector> {
        posts.iter().map(|&p| (p, flat_features(p))).collect()
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let race = test_race("R1");
        for n in [1u8, 2, 8, 18] {
            let runners: Vec<Runner> = (1..=n).map(test_runner).collect();
            let features = feature_map(&(1..=n).collect::<Vec<_>>());
            let scores: BTreeMap<u8, f64> =
                (1..=n).map(|p| (p, p as f64 * 0.7)).collect();
            let predictions =
                predict_race(&race, &runners, &features, &FixedScorer(scores)).unwrap();

            let sum: f64 = predictions.iter().map(|p| p.probability).sum();
            assert!((sum - 1.0).abs() < 1e-6, "n={} sum={}", n, sum);
        }
    }

    #[test]
    fn test_rank_one_is_highest_probability() {
        let race = test_race("R1");
        let runners: Vec<Runner> = (1..=3).map(test_runner).collect();
        let features = feature_map(&[1, 2, 3]);
        let scores: BTreeMap<u8, f64> = [(1, 0.5), (2, 3.0), (3, 1.0)].into_iter().collect();

        let predictions =
            predict_race(&race, &runners, &features, &FixedScorer(scores)).unwrap();
        assert_eq!(predictions[0].rank, 1);
        assert_eq!(predictions[0].post_position, 2);
        assert!(predictions[0].probability > predictions[1].probability);
    }

    #[test]
    fn test_ties_break_by_post_position() {
        let race = test_race("R1");
        let runners: Vec<Runner> = vec![test_runner(7), test_runner(2), test_runner(4)];
        let features = feature_map(&[2, 4, 7]);
        let scores: BTreeMap<u8, f64> = [(2, 1.0), (4, 1.0), (7, 1.0)].into_iter().collect();

        let predictions =
            predict_race(&race, &runners, &features, &FixedScorer(scores)).unwrap();
        let posts: Vec<u8> = predictions.iter().map(|p| p.post_position).collect();
        assert_eq!(posts, vec![2, 4, 7]);
        assert_eq!(predictions[0].rank, 1);
        assert_eq!(predictions[2].rank, 3);
    }

    #[test]
    fn test_empty_race_error() {
        let race = test_race("R1");
        let err = predict_race(&race, &[], &BTreeMap::new(), &FormScorer).unwrap_err();
        assert!(matches!(err, EngineError::EmptyRace(_)));
    }

    #[test]
    fn test_missing_feature_vector_is_incomplete() {
        let race = test_race("R1");
        let runners: Vec<Runner> = (1..=2).map(test_runner).collect();
        let features = feature_map(&[1]); // runner 2 missing

        let err = predict_race(&race, &runners, &features, &FormScorer).unwrap_err();
        assert!(matches!(
            err,
            EngineError::IncompleteFeatureSet {
                post_position: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_non_finite_feature_is_incomplete() {
        let race = test_race("R1");
        let runners = vec![test_runner(1)];
        let mut features = feature_map(&[1]);
        features.get_mut(&1).unwrap().track_affinity = f64::NAN;

        let err = predict_race(&race, &runners, &features, &FormScorer).unwrap_err();
        assert!(matches!(err, EngineError::IncompleteFeatureSet { .. }));
    }

    #[test]
    fn test_single_runner_gets_probability_one() {
        let race = test_race("R1");
        let runners = vec![test_runner(1)];
        let features = feature_map(&[1]);
        let predictions = predict_race(&race, &runners, &features, &FormScorer).unwrap();
        assert_eq!(predictions.len(), 1);
        assert!((predictions[0].probability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_form_scorer_prefers_better_form() {
        let strong = FeatureVector {
            horse_win_rate: 0.6,
            horse_place_rate: 0.9,
            horse_avg_margin: 0.5,
            jockey_win_rate: 0.2,
            track_affinity: 0.8,
            distance_affinity: 0.7,
            class_delta: 0.0,
            days_since_last: 20.0,
        };
        let weak = FeatureVector {
            horse_win_rate: 0.0,
            horse_place_rate: 0.1,
            horse_avg_margin: 6.0,
            jockey_win_rate: 0.05,
            track_affinity: 0.0,
            distance_affinity: 0.1,
            class_delta: 2.0,
            days_since_last: 200.0,
        };
        assert!(FormScorer.score(&strong) > FormScorer.score(&weak));
    }

    #[test]
    fn test_form_scorer_cold_start_is_neutral() {
        let debut = FeatureVector {
            horse_win_rate: Sentinels::COLD_START,
            horse_place_rate: Sentinels::COLD_START,
            horse_avg_margin: Sentinels::COLD_START,
            jockey_win_rate: Sentinels::COLD_START,
            track_affinity: Sentinels::COLD_START,
            distance_affinity: Sentinels::COLD_START,
            class_delta: Sentinels::COLD_START,
            days_since_last: Sentinels::DEBUT,
        };
        assert_eq!(FormScorer.score(&debut), 0.0);
    }
}
