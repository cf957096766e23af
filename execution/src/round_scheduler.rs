//! Round scheduler state machine for the crash table.
//!
//! This module holds the phase transition and timing logic separately from
//! wagers, fairness and I/O.
//!
//! ## Phases
//!
//! A round cycles through three phases:
//! 1. **Betting** - players can place wagers, lasts `betting_ms`
//! 2. **Flying** - the multiplier rises until it reaches the crash point
//! 3. **Ended** - the round is settled, the table rests for `cooldown_ms`
//!
//! `Ended` leads straight back into the next round's `Betting` phase.
//!
//! ## Clock
//!
//! Every call takes `now_ms` from the caller. The scheduler never reads a clock,
//! so transitions are reproducible in tests.

use aviator_types::Phase;

/// Phase configuration with durations in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseConfig {
    /// Duration of the betting phase.
    pub betting_ms: u64,
    /// Rest period after a crash before the next round opens.
    pub cooldown_ms: u64,
    /// Interval between countdown ticks while betting.
    pub betting_tick_ms: u64,
    /// Interval between multiplier ticks while flying.
    pub flying_tick_ms: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            betting_ms: 5_000,
            cooldown_ms: 3_000,
            betting_tick_ms: 100,
            flying_tick_ms: 50,
        }
    }
}

impl PhaseConfig {
    /// Validate the configuration (all durations must be > 0).
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.betting_ms == 0 {
            return Err("betting_ms must be greater than zero");
        }
        if self.cooldown_ms == 0 {
            return Err("cooldown_ms must be greater than zero");
        }
        if self.betting_tick_ms == 0 {
            return Err("betting_tick_ms must be greater than zero");
        }
        if self.flying_tick_ms == 0 {
            return Err("flying_tick_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Result of a phase transition check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Remain in the current phase.
    NoTransition,
    /// Enter `phase`, starting at `started_at_ms`.
    TransitionTo { phase: Phase, started_at_ms: u64 },
}

/// Pure state machine for round phase management.
#[derive(Clone, Debug)]
pub struct RoundScheduler {
    config: PhaseConfig,
}

impl RoundScheduler {
    pub fn new(config: PhaseConfig) -> Self {
        Self { config }
    }

    /// Phase that follows `phase`. The cycle never terminates.
    pub fn next_phase(phase: Phase) -> Phase {
        match phase {
            Phase::Betting => Phase::Flying,
            Phase::Flying => Phase::Ended,
            Phase::Ended => Phase::Betting,
        }
    }

    /// Check whether the current phase is over.
    ///
    /// Betting and Ended are timed. Flying ends on the first check where the
    /// multiplier has reached the crash point.
    pub fn check_transition(
        &self,
        phase: Phase,
        phase_started_at_ms: u64,
        now_ms: u64,
        multiplier: f64,
        crash_point: f64,
    ) -> TransitionResult {
        let due = match phase {
            Phase::Betting => now_ms >= self.betting_ends_at(phase_started_at_ms),
            Phase::Flying => multiplier >= crash_point,
            Phase::Ended => now_ms >= self.cooldown_ends_at(phase_started_at_ms),
        };
        if !due {
            return TransitionResult::NoTransition;
        }
        TransitionResult::TransitionTo {
            phase: Self::next_phase(phase),
            started_at_ms: now_ms,
        }
    }

    pub fn betting_ends_at(&self, betting_started_at_ms: u64) -> u64 {
        betting_started_at_ms.saturating_add(self.config.betting_ms)
    }

    pub fn cooldown_ends_at(&self, ended_at_ms: u64) -> u64 {
        ended_at_ms.saturating_add(self.config.cooldown_ms)
    }

    /// Check if betting is currently allowed.
    pub fn is_betting_open(&self, phase: Phase, phase_started_at_ms: u64, now_ms: u64) -> bool {
        phase == Phase::Betting && now_ms < self.betting_ends_at(phase_started_at_ms)
    }

    /// Milliseconds of betting left, zero once the window has closed.
    pub fn betting_time_left(&self, phase_started_at_ms: u64, now_ms: u64) -> u64 {
        self.betting_ends_at(phase_started_at_ms)
            .saturating_sub(now_ms)
    }

    /// Instant the next tick is due after one processed at `now_ms`.
    ///
    /// Countdown ticks never overshoot the end of betting, and the cooldown is a
    /// single wait until the next round opens.
    pub fn next_tick_at(&self, phase: Phase, phase_started_at_ms: u64, now_ms: u64) -> u64 {
        match phase {
            Phase::Betting => now_ms
                .saturating_add(self.config.betting_tick_ms)
                .min(self.betting_ends_at(phase_started_at_ms)),
            Phase::Flying => now_ms.saturating_add(self.config.flying_tick_ms),
            Phase::Ended => self.cooldown_ends_at(phase_started_at_ms),
        }
    }
}
