//! Multiplier growth while a round is flying.
//!
//! `multiplier(t) = max(1.00, base + growth_rate * t + acceleration * t^1.5)` where
//! `t` is seconds since the flying phase started. With non-negative coefficients
//! the curve is smooth and non-decreasing, so the multiplier observed by players
//! never goes backwards within a round.

/// Coefficients of the flight curve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MultiplierCurve {
    pub base: f64,
    pub growth_rate: f64,
    pub acceleration: f64,
}

impl Default for MultiplierCurve {
    fn default() -> Self {
        Self {
            base: 1.0,
            growth_rate: 0.1,
            acceleration: 0.02,
        }
    }
}

impl MultiplierCurve {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.base.is_finite() || self.base < 1.0 {
            return Err("base must be at least 1.0");
        }
        if !self.growth_rate.is_finite() || self.growth_rate < 0.0 {
            return Err("growth_rate must be non-negative");
        }
        if !self.acceleration.is_finite() || self.acceleration < 0.0 {
            return Err("acceleration must be non-negative");
        }
        if self.growth_rate == 0.0 && self.acceleration == 0.0 {
            return Err("curve must grow");
        }
        Ok(())
    }

    /// Multiplier after `seconds` of flight.
    pub fn at_seconds(&self, seconds: f64) -> f64 {
        let t = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let value = self.base + self.growth_rate * t + self.acceleration * t.powf(1.5);
        value.max(1.0)
    }

    /// Multiplier after `elapsed_ms` milliseconds of flight.
    pub fn at_elapsed_ms(&self, elapsed_ms: u64) -> f64 {
        self.at_seconds(elapsed_ms as f64 / 1_000.0)
    }
}
