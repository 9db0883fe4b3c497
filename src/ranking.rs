// Ranking engine: orders assessed options under one of four criteria.
// Compatible options always come first; inside each bucket the criterion applies,
// and the option key (source, then id) closes every remaining tie so the order is total.

use crate::compatibility::AssessedOption;
use crate::fulfillment::SourceKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RankingError {
    #[error("Unknown sort criterion: {0}")]
    UnknownCriterion(String),

    #[error("Ranking weight {name} must be finite and non-negative, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("Ranking weights must not all be zero")]
    AllZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortCriterion {
    Cheapest,
    Soonest,
    LeastDisruption,
    #[default]
    Recommended,
}

impl SortCriterion {
    pub const ALL: [SortCriterion; 4] = [
        SortCriterion::Cheapest,
        SortCriterion::Soonest,
        SortCriterion::LeastDisruption,
        SortCriterion::Recommended,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortCriterion::Cheapest => "cheapest",
            SortCriterion::Soonest => "soonest",
            SortCriterion::LeastDisruption => "least_disruption",
            SortCriterion::Recommended => "recommended",
        }
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortCriterion {
    type Err = RankingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase().replace('-', "_");
        SortCriterion::ALL
            .into_iter()
            .find(|criterion| criterion.as_str() == wanted)
            .ok_or_else(|| RankingError::UnknownCriterion(value.to_string()))
    }
}

// Weights of the `recommended` composite score.
//
// Each component is min-max normalized over the ranked set before weighting,
// so the weights only express relative importance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    pub cost: f64,
    pub eta: f64,
    pub disruption: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            cost: 0.4,
            eta: 0.3,
            disruption: 0.3,
        }
    }
}

impl RankingWeights {
    pub fn new(cost: f64, eta: f64, disruption: f64) -> Result<Self, RankingError> {
        for (name, value) in [("cost", cost), ("eta", eta), ("disruption", disruption)] {
            if !value.is_finite() || value < 0.0 {
                return Err(RankingError::InvalidWeight { name, value });
            }
        }
        if cost + eta + disruption == 0.0 {
            return Err(RankingError::AllZero);
        }
        Ok(Self {
            cost,
            eta,
            disruption,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RankingEngine {
    weights: RankingWeights,
}

impl RankingEngine {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> RankingWeights {
        self.weights
    }

    // Returns a new ordering of `options`; the input is left as it was.
    pub fn rank(&self, options: &[AssessedOption], criterion: SortCriterion) -> Vec<AssessedOption> {
        let scores = match criterion {
            SortCriterion::Recommended => self.composite_scores(options),
            _ => Vec::new(),
        };

        let mut order: Vec<usize> = (0..options.len()).collect();
        order.sort_by(|&a, &b| {
            let (left, right) = (&options[a], &options[b]);
            // true sorts after false, so compare right to left to put compatible first
            right
                .is_compatible()
                .cmp(&left.is_compatible())
                .then_with(|| match criterion {
                    SortCriterion::Cheapest => cheapest(left, right),
                    SortCriterion::Soonest => soonest(left, right),
                    SortCriterion::LeastDisruption => least_disruption(left, right),
                    SortCriterion::Recommended => scores[a]
                        .total_cmp(&scores[b])
                        .then_with(|| source_priority(left, right)),
                })
                .then_with(|| left.option.key().cmp(&right.option.key()))
        });

        order.into_iter().map(|i| options[i].clone()).collect()
    }

    // Composite `recommended` score per option, in input order. Lower is better.
    pub fn composite_scores(&self, options: &[AssessedOption]) -> Vec<f64> {
        let costs: Vec<f64> = options
            .iter()
            .map(|o| o.option.cost.cents() as f64)
            .collect();
        let etas: Vec<f64> = options
            .iter()
            .map(|o| o.option.eta().timestamp_millis() as f64)
            .collect();
        let disruptions: Vec<f64> = options
            .iter()
            .map(|o| o.option.disruption() as f64)
            .collect();

        let costs = min_max_normalize(&costs);
        let etas = min_max_normalize(&etas);
        let disruptions = min_max_normalize(&disruptions);

        (0..options.len())
            .map(|i| {
                self.weights.cost * costs[i]
                    + self.weights.eta * etas[i]
                    + self.weights.disruption * disruptions[i]
            })
            .collect()
    }
}

// Scales into [0, 1]; a component with a single distinct value scores 0 everywhere
fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if !span.is_finite() || span <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / span).collect()
}

fn source_priority(left: &AssessedOption, right: &AssessedOption) -> Ordering {
    let rank = |kind: SourceKind| kind.index();
    rank(left.option.source()).cmp(&rank(right.option.source()))
}

fn cheapest(left: &AssessedOption, right: &AssessedOption) -> Ordering {
    left.option
        .cost
        .cmp(&right.option.cost)
        .then_with(|| left.option.eta().cmp(&right.option.eta()))
        .then_with(|| source_priority(left, right))
}

fn soonest(left: &AssessedOption, right: &AssessedOption) -> Ordering {
    left.option
        .eta()
        .cmp(&right.option.eta())
        .then_with(|| left.option.cost.cmp(&right.option.cost))
        .then_with(|| source_priority(left, right))
}

fn least_disruption(left: &AssessedOption, right: &AssessedOption) -> Ordering {
    left.option
        .disruption()
        .cmp(&right.option.disruption())
        .then_with(|| left.option.cost.cmp(&right.option.cost))
        .then_with(|| source_priority(left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulfillment::fixtures::*;
    use crate::fulfillment::{Cost, FulfillmentOption, ServiceLevel, VehicleType};
    use crate::trip::{MobilityType, TripConstraints};
    use test_case::test_case;

    fn assess_all(options: Vec<FulfillmentOption>, constraints: &TripConstraints) -> Vec<AssessedOption> {
        options
            .into_iter()
            .map(|o| AssessedOption::assess(o, constraints))
            .collect()
    }

    fn ids(ranked: &[AssessedOption]) -> Vec<&str> {
        ranked.iter().map(|o| o.option.id.as_str()).collect()
    }

    fn ambulatory() -> TripConstraints {
        TripConstraints::new(MobilityType::Ambulatory)
    }

    #[test]
    fn test_cheapest_orders_by_cost() {
        let options = assess_all(
            vec![
                fleet("fleet", Cost::dollars(40), 20, VehicleType::Sedan, 4),
                tnc("tnc", Cost::dollars(55), 10, ServiceLevel::Standard),
                marketplace("market", Cost::dollars(30), 30, &[], 4),
            ],
            &ambulatory(),
        );

        let ranked = RankingEngine::default().rank(&options, SortCriterion::Cheapest);
        let costs: Vec<u64> = ranked.iter().map(|o| o.option.cost.cents() / 100).collect();
        assert_eq!(costs, vec![30, 40, 55]);
    }

    #[test]
    fn test_cheapest_ties_break_on_eta_then_source() {
        let options = assess_all(
            vec![
                tnc("tnc", Cost::dollars(40), 10, ServiceLevel::Standard),
                marketplace("market", Cost::dollars(40), 10, &[], 4),
                fleet("fleet-late", Cost::dollars(40), 25, VehicleType::Sedan, 4),
                fleet("fleet", Cost::dollars(40), 10, VehicleType::Sedan, 4),
            ],
            &ambulatory(),
        );

        let ranked = RankingEngine::default().rank(&options, SortCriterion::Cheapest);
        assert_eq!(ids(&ranked), vec!["fleet", "market", "tnc", "fleet-late"]);
    }

    #[test_case(SortCriterion::Cheapest)]
    #[test_case(SortCriterion::Soonest)]
    #[test_case(SortCriterion::LeastDisruption)]
    #[test_case(SortCriterion::Recommended)]
    fn test_shared_id_across_sources_ranks_independent_of_input_order(criterion: SortCriterion) {
        let forward = assess_all(
            vec![
                fleet("opt-1", Cost::dollars(30), 10, VehicleType::Sedan, 4),
                tnc("opt-1", Cost::dollars(30), 10, ServiceLevel::Standard),
            ],
            &ambulatory(),
        );
        let backward: Vec<AssessedOption> = forward.iter().rev().cloned().collect();

        let engine = RankingEngine::default();
        let keys = |ranked: Vec<AssessedOption>| {
            ranked.iter().map(|o| o.option.key()).collect::<Vec<_>>()
        };
        assert_eq!(
            keys(engine.rank(&forward, criterion)),
            keys(engine.rank(&backward, criterion))
        );
    }

    #[test]
    fn test_soonest_ties_break_on_cost() {
        let options = assess_all(
            vec![
                tnc("tnc", Cost::dollars(25), 5, ServiceLevel::Standard),
                fleet("fleet", Cost::dollars(20), 5, VehicleType::Sedan, 4),
                marketplace("market", Cost::dollars(10), 45, &[], 4),
            ],
            &ambulatory(),
        );

        let ranked = RankingEngine::default().rank(&options, SortCriterion::Soonest);
        assert_eq!(ids(&ranked), vec!["fleet", "tnc", "market"]);
    }

    #[test]
    fn test_least_disruption_counts_impacts() {
        let options = assess_all(
            vec![
                with_impacts(fleet("busy", Cost::dollars(20), 5, VehicleType::Sedan, 4), &["TR-1", "TR-2"]),
                with_impacts(fleet("light", Cost::dollars(25), 5, VehicleType::Sedan, 4), &["TR-3"]),
                tnc("tnc", Cost::dollars(60), 5, ServiceLevel::Standard),
                marketplace("market", Cost::dollars(45), 5, &[], 4),
            ],
            &ambulatory(),
        );

        let ranked = RankingEngine::default().rank(&options, SortCriterion::LeastDisruption);
        assert_eq!(ids(&ranked), vec!["market", "tnc", "light", "busy"]);
    }

    #[test]
    fn test_recommended_uses_weighted_normalized_score() {
        let options = assess_all(
            vec![
                with_impacts(fleet("c", Cost::dollars(40), 20, VehicleType::Sedan, 4), &["TR-9"]),
                fleet("b", Cost::dollars(50), 10, VehicleType::Sedan, 4),
                tnc("a", Cost::dollars(30), 40, ServiceLevel::Standard),
            ],
            &ambulatory(),
        );

        let engine = RankingEngine::default();
        let scores = engine.composite_scores(&options);
        assert!((scores[0] - 0.6).abs() < 1e-9);
        assert!((scores[1] - 0.4).abs() < 1e-9);
        assert!((scores[2] - 0.3).abs() < 1e-9);

        let ranked = engine.rank(&options, SortCriterion::Recommended);
        assert_eq!(ids(&ranked), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_constant_component_contributes_nothing() {
        let options = assess_all(
            vec![
                fleet("x", Cost::dollars(30), 10, VehicleType::Sedan, 4),
                fleet("y", Cost::dollars(30), 40, VehicleType::Sedan, 4),
            ],
            &ambulatory(),
        );
        let scores = RankingEngine::default().composite_scores(&options);
        assert_eq!(scores, vec![0.0, 0.3]);

        let single = RankingEngine::default().composite_scores(&options[..1]);
        assert_eq!(single, vec![0.0]);
    }

    #[test_case(SortCriterion::Cheapest; "cheapest")]
    #[test_case(SortCriterion::Soonest; "soonest")]
    #[test_case(SortCriterion::LeastDisruption; "least disruption")]
    #[test_case(SortCriterion::Recommended; "recommended")]
    fn test_incompatible_options_sort_last(criterion: SortCriterion) {
        let constraints = TripConstraints::new(MobilityType::Wheelchair);
        let options = assess_all(
            vec![
                fleet("cheap-sedan", Cost::dollars(10), 1, VehicleType::Sedan, 4),
                tnc("wav", Cost::dollars(70), 50, ServiceLevel::Wav),
                with_impacts(
                    fleet("van", Cost::dollars(80), 60, VehicleType::WheelchairVan, 4),
                    &["TR-1", "TR-2", "TR-3"],
                ),
            ],
            &constraints,
        );

        let ranked = RankingEngine::default().rank(&options, criterion);
        assert_eq!(ranked.last().map(|o| o.option.id.as_str()), Some("cheap-sedan"));
        assert!(ranked[..2].iter().all(|o| o.is_compatible()));
    }

    #[test_case(SortCriterion::Cheapest; "cheapest")]
    #[test_case(SortCriterion::Soonest; "soonest")]
    #[test_case(SortCriterion::LeastDisruption; "least disruption")]
    #[test_case(SortCriterion::Recommended; "recommended")]
    fn test_ranking_is_idempotent(criterion: SortCriterion) {
        let options = assess_all(
            vec![
                tnc("t1", Cost::dollars(30), 15, ServiceLevel::Xl),
                fleet("f1", Cost::dollars(30), 15, VehicleType::Sedan, 4),
                with_impacts(fleet("f2", Cost::dollars(22), 35, VehicleType::Minivan, 6), &["TR-4"]),
                marketplace("m1", Cost::dollars(48), 5, &[], 4),
                marketplace("m2", Cost::dollars(30), 15, &[], 4),
            ],
            &ambulatory(),
        );

        let engine = RankingEngine::default();
        let once = engine.rank(&options, criterion);
        let twice = engine.rank(&once, criterion);
        assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn test_rank_leaves_input_untouched() {
        let options = assess_all(
            vec![
                tnc("t1", Cost::dollars(55), 15, ServiceLevel::Standard),
                fleet("f1", Cost::dollars(30), 15, VehicleType::Sedan, 4),
            ],
            &ambulatory(),
        );
        let before = options.clone();
        let _ = RankingEngine::default().rank(&options, SortCriterion::Cheapest);
        assert_eq!(options, before);
    }

    #[test_case("cheapest", SortCriterion::Cheapest)]
    #[test_case("least-disruption", SortCriterion::LeastDisruption)]
    #[test_case(" Recommended ", SortCriterion::Recommended)]
    fn test_parse_criterion(input: &str, expected: SortCriterion) {
        assert_eq!(input.parse::<SortCriterion>(), Ok(expected));
    }

    #[test]
    fn test_weights_validation() {
        assert!(RankingWeights::new(0.5, 0.5, 0.0).is_ok());
        assert_eq!(
            RankingWeights::new(-0.1, 0.5, 0.5),
            Err(RankingError::InvalidWeight {
                name: "cost",
                value: -0.1
            })
        );
        assert_eq!(RankingWeights::new(0.0, 0.0, 0.0), Err(RankingError::AllZero));
        assert!("fastest".parse::<SortCriterion>().is_err());
    }
}
