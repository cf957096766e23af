//! Helpers for tests that drive the engine and ledger.

use aviator_types::{ConnectionId, PlayerDisplay, WagerSlot};
use rand::{rngs::StdRng, SeedableRng};

use crate::fairness::crash_point;
use crate::ledger::PlaceWager;

/// Deterministic RNG for seeds and round ids.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A fixed 64 character hex seed.
pub fn test_seed() -> String {
    "deadbeef".repeat(8)
}

/// Display identity for a test player.
pub fn player(id: u64) -> PlayerDisplay {
    PlayerDisplay {
        user_id: format!("user-{id}"),
        name: format!("player-{id}"),
        avatar: String::new(),
    }
}

/// Wager request owned by `connection`, placed by `player(connection.0)`.
pub fn place_request(
    connection: ConnectionId,
    slot: WagerSlot,
    stake: f64,
    target: f64,
    auto: bool,
) -> PlaceWager {
    PlaceWager {
        connection,
        slot,
        stake,
        target,
        auto,
        player: player(connection.0),
    }
}

/// Find a seed whose first round (nonce 1) crashes at a point matching `accept`.
pub fn seed_with_first_crash(accept: impl Fn(f64) -> bool) -> Option<String> {
    (0u64..200_000)
        .map(|i| format!("{i:064x}"))
        .find(|seed| crash_point(seed, 1).map(&accept).unwrap_or(false))
}
