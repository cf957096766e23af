use aviator_types::Phase;

use crate::fairness::FairDraw;

/// The round currently on the table.
///
/// The crash point and fairness inputs are fixed when the round is opened and
/// never change afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Round {
    pub id: String,
    pub crash_point: f64,
    pub seed: String,
    pub seed_hash: String,
    pub nonce: u64,
    pub phase: Phase,
    pub phase_started_at_ms: u64,
    pub flying_started_at_ms: Option<u64>,
    /// Last multiplier published for this round.
    pub multiplier: f64,
}

impl Round {
    /// Open a round in its betting phase.
    pub fn open(id: String, draw: FairDraw, now_ms: u64) -> Self {
        Self {
            id,
            crash_point: draw.crash_point,
            seed: draw.seed,
            seed_hash: draw.seed_hash,
            nonce: draw.nonce,
            phase: Phase::Betting,
            phase_started_at_ms: now_ms,
            flying_started_at_ms: None,
            multiplier: 1.0,
        }
    }

    pub fn enter(&mut self, phase: Phase, now_ms: u64) {
        self.phase = phase;
        self.phase_started_at_ms = now_ms;
        if phase == Phase::Flying {
            self.flying_started_at_ms = Some(now_ms);
        }
    }

    /// Milliseconds since takeoff, zero before the round is flying.
    pub fn flight_ms(&self, now_ms: u64) -> u64 {
        self.flying_started_at_ms
            .map(|started| now_ms.saturating_sub(started))
            .unwrap_or(0)
    }
}
