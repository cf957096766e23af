use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a live websocket connection.
///
/// Wagers are owned by connections rather than users: a user connected twice
/// holds two independent pairs of slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One of the two independent wagers a connection may hold per round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WagerSlot {
    #[serde(rename = "f", alias = "primary")]
    Primary,
    #[serde(rename = "s", alias = "secondary")]
    Secondary,
}

impl WagerSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerSlot::Primary => "f",
            WagerSlot::Secondary => "s",
        }
    }
}

impl TryFrom<&str> for WagerSlot {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "f" | "primary" => Ok(WagerSlot::Primary),
            "s" | "secondary" => Ok(WagerSlot::Secondary),
            _ => Err(()),
        }
    }
}

/// Who placed a wager, as shown to the rest of the table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDisplay {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

/// Public view of an active wager, broadcast to every subscriber.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerView {
    pub name: String,
    pub avatar: String,
    pub slot: WagerSlot,
    pub stake: f64,
    pub target: f64,
    pub auto: bool,
    pub cashed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_out_at: Option<f64>,
    pub payout: f64,
}
