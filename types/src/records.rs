use serde::{Deserialize, Serialize};

use crate::wager::WagerSlot;

/// History entry for one settled wager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerRecord {
    pub round_id: String,
    pub user_id: String,
    pub name: String,
    pub slot: WagerSlot,
    pub stake: f64,
    pub target: f64,
    pub auto: bool,
    pub cashed_out: bool,
    pub cash_out_at: Option<f64>,
    pub payout: f64,
    pub created_at_ms: u64,
}

/// History entry for one finished round.
///
/// `seed` and `nonce` make the crash point independently recomputable once the
/// seed has been revealed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub round_id: String,
    pub crash_point: f64,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub total_stake: f64,
    pub total_payout: f64,
    pub player_count: u32,
    pub seed: String,
    pub seed_hash: String,
    pub nonce: u64,
}
