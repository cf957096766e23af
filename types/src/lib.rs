//! Common types shared by the crash table engine and the service that hosts it.
//!
//! Everything here is plain data: identifiers, the wire messages exchanged with
//! websocket clients, and the history records handed to the storage layer.

pub mod messages;
pub mod records;
pub mod round;
pub mod wager;

pub use messages::{
    ClientMessage, PlayerInfo, RoundResult, RoundState, ServerMessage, SlotResult,
};
pub use records::{RoundRecord, WagerRecord};
pub use round::{BetLimits, LimitsError, Phase};
pub use wager::{ConnectionId, PlayerDisplay, WagerSlot, WagerView};
