// Matching configuration: adapter time budget, recommended-score weights and default sort.

use crate::ranking::{RankingError, RankingWeights, SortCriterion};
use std::env;
use std::time::Duration;
use thiserror::Error;

pub const ENV_SOURCE_TIMEOUT_MS: &str = "NEMT_SOURCE_TIMEOUT_MS";
pub const ENV_DEFAULT_SORT: &str = "NEMT_DEFAULT_SORT";
pub const ENV_WEIGHT_COST: &str = "NEMT_WEIGHT_COST";
pub const ENV_WEIGHT_ETA: &str = "NEMT_WEIGHT_ETA";
pub const ENV_WEIGHT_DISRUPTION: &str = "NEMT_WEIGHT_DISRUPTION";
pub const ENV_LOG: &str = "NEMT_LOG";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{var} must be a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    ZeroTimeout { var: &'static str },

    #[error("Invalid ranking configuration: {0}")]
    Ranking(#[from] RankingError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    // Budget for one adapter call; exceeding it counts as a source error
    pub source_timeout: Duration,
    pub ranking: RankingWeights,
    pub default_sort: SortCriterion,
    pub log_filter: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_millis(5000),
            ranking: RankingWeights::default(),
            default_sort: SortCriterion::Recommended,
            log_filter: "info".to_string(),
        }
    }
}

impl MatchingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    // Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let source_timeout = match lookup(ENV_SOURCE_TIMEOUT_MS) {
            Some(raw) => {
                let millis = parse_number::<u64>(ENV_SOURCE_TIMEOUT_MS, &raw)?;
                if millis == 0 {
                    return Err(ConfigError::ZeroTimeout {
                        var: ENV_SOURCE_TIMEOUT_MS,
                    });
                }
                Duration::from_millis(millis)
            }
            None => defaults.source_timeout,
        };

        let weight = |var: &'static str, fallback: f64| -> Result<f64, ConfigError> {
            lookup(var).map_or(Ok(fallback), |raw| parse_number::<f64>(var, &raw))
        };
        let ranking = RankingWeights::new(
            weight(ENV_WEIGHT_COST, defaults.ranking.cost)?,
            weight(ENV_WEIGHT_ETA, defaults.ranking.eta)?,
            weight(ENV_WEIGHT_DISRUPTION, defaults.ranking.disruption)?,
        )?;

        let default_sort = match lookup(ENV_DEFAULT_SORT) {
            Some(raw) => raw.parse::<SortCriterion>()?,
            None => defaults.default_sort,
        };

        let log_filter = lookup(ENV_LOG).unwrap_or(defaults.log_filter);

        Ok(Self {
            source_timeout,
            ranking,
            default_sort,
            log_filter,
        })
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: raw.to_string(),
    })
}
