//! Websocket wire format.
//!
//! Every frame is a JSON object tagged by `type`. Field names are camelCase to
//! match what browser clients expect.

use serde::{Deserialize, Serialize};

use crate::round::{BetLimits, Phase};
use crate::wager::{WagerSlot, WagerView};

/// Snapshot of the round as seen by subscribers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    pub round_id: String,
    pub phase: Phase,
    pub multiplier: f64,
    /// Only revealed once the round has ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub betting_time_left_ms: Option<u64>,
    /// SHA-256 commitment of the active server seed.
    pub seed_hash: String,
    pub nonce: u64,
    pub time_ms: u64,
}

/// Identity and balance of the connection that entered the room.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub user_id: String,
    pub name: String,
    pub avatar: String,
    pub balance: f64,
    pub authenticated: bool,
}

/// Outcome of one slot in a settled round.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotResult {
    pub stake: f64,
    pub target: f64,
    pub auto: bool,
    pub cashed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_out_at: Option<f64>,
    pub payout: f64,
    /// `payout - stake`; negative for a lost wager.
    pub profit: f64,
}

/// Per-connection settlement notice.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round_id: String,
    pub crash_point: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<SlotResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<SlotResult>,
}

impl RoundResult {
    pub fn slot_mut(&mut self, slot: WagerSlot) -> &mut Option<SlotResult> {
        match slot {
            WagerSlot::Primary => &mut self.primary,
            WagerSlot::Secondary => &mut self.secondary,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    GameState(RoundState),
    Wagers {
        wagers: Vec<WagerView>,
    },
    History {
        crash_points: Vec<f64>,
    },
    BetLimits(BetLimits),
    MyInfo(PlayerInfo),
    MyBetState {
        slot: WagerSlot,
        betted: bool,
    },
    RoundResult(RoundResult),
    Balance {
        balance: f64,
    },
    SeedRevealed {
        seed: String,
        seed_hash: String,
        last_nonce: u64,
    },
    Success {
        message: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        slot: Option<WagerSlot>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, slot: Option<WagerSlot>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            slot,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        ServerMessage::Success {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    EnterRoom {
        #[serde(default)]
        token: Option<String>,
    },
    PlaceBet {
        stake: f64,
        target: f64,
        slot: WagerSlot,
        #[serde(default)]
        auto: bool,
    },
    CashOut {
        slot: WagerSlot,
        /// Client-side multiplier. Informational only: the server always
        /// settles at its own live multiplier.
        #[serde(default)]
        multiplier: Option<f64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_place_bet() {
        let raw = r#"{"type":"placeBet","stake":50,"target":2.0,"slot":"f","auto":true}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::PlaceBet {
                stake: 50.0,
                target: 2.0,
                slot: WagerSlot::Primary,
                auto: true,
            }
        );
    }

    #[test]
    fn test_parse_enter_room_without_token() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"enterRoom"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::EnterRoom { token: None });
    }

    #[test]
    fn test_parse_cash_out_keeps_client_multiplier_optional() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"cashOut","slot":"s","multiplier":99.0}"#).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::CashOut {
                slot: WagerSlot::Secondary,
                multiplier: Some(99.0),
            }
        );
    }

    #[test]
    fn test_serialize_game_state_hides_unrevealed_crash_point() {
        let message = ServerMessage::GameState(RoundState {
            round_id: "r1".to_string(),
            phase: Phase::Flying,
            multiplier: 1.5,
            crash_point: None,
            betting_time_left_ms: None,
            seed_hash: "ab".to_string(),
            nonce: 3,
            time_ms: 10,
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "gameState",
                "roundId": "r1",
                "phase": "flying",
                "multiplier": 1.5,
                "seedHash": "ab",
                "nonce": 3,
                "timeMs": 10,
            })
        );
    }

    #[test]
    fn test_serialize_error_notice() {
        let value =
            serde_json::to_value(ServerMessage::error("Already cashed out", Some(WagerSlot::Primary)))
                .unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "message": "Already cashed out", "slot": "f"})
        );
    }

    #[test]
    fn test_serialize_seed_reveal_fields() {
        let value = serde_json::to_value(ServerMessage::SeedRevealed {
            seed: "aa".to_string(),
            seed_hash: "bb".to_string(),
            last_nonce: 7,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "seedRevealed", "seed": "aa", "seedHash": "bb", "lastNonce": 7})
        );
    }
}
