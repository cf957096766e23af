//! Turning a crashed round into history records and per-player results.

use std::collections::{BTreeMap, BTreeSet};

use aviator_types::{ConnectionId, RoundRecord, RoundResult, SlotResult, WagerRecord};

use crate::ledger::Wager;
use crate::round::Round;

/// Everything produced when a round ends.
#[derive(Clone, Debug, PartialEq)]
pub struct Settlement {
    pub round: RoundRecord,
    pub wagers: Vec<WagerRecord>,
    /// One result per connection that held a wager, both slots grouped.
    pub results: Vec<(ConnectionId, RoundResult)>,
}

/// Settle every wager left in the ledger at the crash.
///
/// Wagers that never cashed out pay nothing.
pub fn settle(round: &Round, wagers: Vec<Wager>, ended_at_ms: u64) -> Settlement {
    let started_at_ms = round
        .flying_started_at_ms
        .unwrap_or(round.phase_started_at_ms);

    let mut records = Vec::with_capacity(wagers.len());
    let mut results: BTreeMap<ConnectionId, RoundResult> = BTreeMap::new();
    let mut players = BTreeSet::new();
    let mut total_stake = 0.0;
    let mut total_payout = 0.0;

    for wager in wagers {
        let payout = match (wager.cashed_out, wager.cash_out_at) {
            (true, Some(multiplier)) => wager.stake * multiplier,
            _ => 0.0,
        };
        total_stake += wager.stake;
        total_payout += payout;
        players.insert(wager.player.user_id.clone());

        let result = results
            .entry(wager.connection)
            .or_insert_with(|| RoundResult {
                round_id: round.id.clone(),
                crash_point: round.crash_point,
                primary: None,
                secondary: None,
            });
        *result.slot_mut(wager.slot) = Some(SlotResult {
            stake: wager.stake,
            target: wager.target,
            auto: wager.auto,
            cashed_out: wager.cashed_out,
            cash_out_at: wager.cash_out_at,
            payout,
            profit: payout - wager.stake,
        });

        records.push(WagerRecord {
            round_id: round.id.clone(),
            user_id: wager.player.user_id,
            name: wager.player.name,
            slot: wager.slot,
            stake: wager.stake,
            target: wager.target,
            auto: wager.auto,
            cashed_out: wager.cashed_out,
            cash_out_at: wager.cash_out_at,
            payout,
            created_at_ms: ended_at_ms,
        });
    }

    Settlement {
        round: RoundRecord {
            round_id: round.id.clone(),
            crash_point: round.crash_point,
            started_at_ms,
            ended_at_ms,
            total_stake,
            total_payout,
            player_count: u32::try_from(players.len()).unwrap_or(u32::MAX),
            seed: round.seed.clone(),
            seed_hash: round.seed_hash.clone(),
            nonce: round.nonce,
        },
        wagers: records,
        results: results.into_iter().collect(),
    }
}
