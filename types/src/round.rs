use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of the current round.
///
/// A round always runs `Betting -> Flying -> Ended` and the table immediately
/// opens the next round's `Betting` phase once the cooldown elapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Betting,
    Flying,
    Ended,
}

#[derive(Debug, Error, PartialEq)]
pub enum LimitsError {
    #[error("min_bet must be a positive number (got {0})")]
    InvalidMinimum(f64),
    #[error("max_bet must be >= min_bet (min={min}, max={max})")]
    Inverted { min: f64, max: f64 },
}

/// Stake bounds enforced when a wager is placed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BetLimits {
    pub min: f64,
    pub max: f64,
}

impl BetLimits {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn validate(&self) -> Result<(), LimitsError> {
        if !self.min.is_finite() || self.min <= 0.0 {
            return Err(LimitsError::InvalidMinimum(self.min));
        }
        if !self.max.is_finite() || self.max < self.min {
            return Err(LimitsError::Inverted {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl Default for BetLimits {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 1_000.0,
        }
    }
}
