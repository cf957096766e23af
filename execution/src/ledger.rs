//! Active wagers for the current round.
//!
//! The ledger is keyed by `(connection, slot)` so a connection holds at most one
//! wager per slot. Entries live for exactly one round: they are created while
//! betting is open, cashed out at most once while flying, and drained at
//! settlement (or dropped early when the owning connection goes away).

use std::collections::BTreeMap;

use aviator_types::{BetLimits, ConnectionId, Phase, PlayerDisplay, WagerSlot, WagerView};
use thiserror::Error;

/// Smallest target accepted for an automatic cash-out.
pub const MIN_AUTO_TARGET: f64 = 1.01;

/// Reasons a wager request is refused. The display text is sent back verbatim
/// to the requesting connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WagerError {
    #[error("Betting phase has ended")]
    BettingClosed,
    #[error("Invalid bet amount")]
    InvalidStake,
    #[error("Minimum bet is {min}")]
    BelowMinimum { min: f64 },
    #[error("Maximum bet is {max}")]
    AboveMaximum { max: f64 },
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Auto cash out target must be at least {min}")]
    InvalidTarget { min: f64 },
    #[error("Bet already placed for this slot")]
    DuplicateWager,
    #[error("No active bet found")]
    NoActiveWager,
    #[error("Already cashed out")]
    AlreadyCashedOut,
    #[error("Cannot cash out at this time")]
    CashOutClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WagerKey {
    pub connection: ConnectionId,
    pub slot: WagerSlot,
}

impl WagerKey {
    pub fn new(connection: ConnectionId, slot: WagerSlot) -> Self {
        Self { connection, slot }
    }
}

/// Request to open a wager.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaceWager {
    pub connection: ConnectionId,
    pub slot: WagerSlot,
    pub stake: f64,
    pub target: f64,
    pub auto: bool,
    pub player: PlayerDisplay,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Wager {
    pub connection: ConnectionId,
    pub player: PlayerDisplay,
    pub slot: WagerSlot,
    pub stake: f64,
    pub target: f64,
    pub auto: bool,
    pub cashed_out: bool,
    pub cash_out_at: Option<f64>,
    pub payout: f64,
}

impl Wager {
    pub fn view(&self) -> WagerView {
        WagerView {
            name: self.player.name.clone(),
            avatar: self.player.avatar.clone(),
            slot: self.slot,
            stake: self.stake,
            target: self.target,
            auto: self.auto,
            cashed_out: self.cashed_out,
            cash_out_at: self.cash_out_at,
            payout: self.payout,
        }
    }
}

/// A completed cash-out; the caller credits `payout` to `user_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct CashOut {
    pub connection: ConnectionId,
    pub user_id: String,
    pub slot: WagerSlot,
    pub stake: f64,
    pub multiplier: f64,
    pub payout: f64,
    pub auto: bool,
}

#[derive(Clone, Debug, Default)]
pub struct BetLedger {
    wagers: BTreeMap<WagerKey, Wager>,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a stake against the phase, the table limits and the player's balance.
    pub fn validate(
        phase: Phase,
        limits: &BetLimits,
        stake: f64,
        balance: f64,
    ) -> Result<(), WagerError> {
        if phase != Phase::Betting {
            return Err(WagerError::BettingClosed);
        }
        if !stake.is_finite() || stake <= 0.0 {
            return Err(WagerError::InvalidStake);
        }
        if stake < limits.min {
            return Err(WagerError::BelowMinimum { min: limits.min });
        }
        if stake > limits.max {
            return Err(WagerError::AboveMaximum { max: limits.max });
        }
        if stake > balance {
            return Err(WagerError::InsufficientBalance);
        }
        Ok(())
    }

    pub fn place(&mut self, phase: Phase, request: PlaceWager) -> Result<(), WagerError> {
        if phase != Phase::Betting {
            return Err(WagerError::BettingClosed);
        }
        let key = WagerKey::new(request.connection, request.slot);
        if self.wagers.contains_key(&key) {
            return Err(WagerError::DuplicateWager);
        }
        if request.auto && !(request.target >= MIN_AUTO_TARGET) {
            return Err(WagerError::InvalidTarget {
                min: MIN_AUTO_TARGET,
            });
        }

        self.wagers.insert(
            key,
            Wager {
                connection: request.connection,
                player: request.player,
                slot: request.slot,
                stake: request.stake,
                target: request.target,
                auto: request.auto,
                cashed_out: false,
                cash_out_at: None,
                payout: 0.0,
            },
        );
        Ok(())
    }

    /// Cash out one wager at `multiplier`.
    pub fn cash_out(
        &mut self,
        phase: Phase,
        connection: ConnectionId,
        slot: WagerSlot,
        multiplier: f64,
    ) -> Result<CashOut, WagerError> {
        let wager = self
            .wagers
            .get_mut(&WagerKey::new(connection, slot))
            .ok_or(WagerError::NoActiveWager)?;
        if wager.cashed_out {
            return Err(WagerError::AlreadyCashedOut);
        }
        if phase != Phase::Flying {
            return Err(WagerError::CashOutClosed);
        }
        Ok(Self::settle_cash_out(wager, multiplier))
    }

    /// Cash out every automatic wager whose target has been reached.
    pub fn auto_cash_outs(&mut self, phase: Phase, multiplier: f64) -> Vec<CashOut> {
        if phase != Phase::Flying {
            return Vec::new();
        }
        self.wagers
            .values_mut()
            .filter(|wager| wager.auto && !wager.cashed_out && wager.target <= multiplier)
            .map(|wager| Self::settle_cash_out(wager, multiplier))
            .collect()
    }

    fn settle_cash_out(wager: &mut Wager, multiplier: f64) -> CashOut {
        wager.cashed_out = true;
        wager.cash_out_at = Some(multiplier);
        wager.payout = wager.stake * multiplier;
        CashOut {
            connection: wager.connection,
            user_id: wager.player.user_id.clone(),
            slot: wager.slot,
            stake: wager.stake,
            multiplier,
            payout: wager.payout,
            auto: wager.auto,
        }
    }

    /// Forfeit every wager owned by `connection`. Returns how many were removed.
    pub fn remove_all(&mut self, connection: ConnectionId) -> usize {
        let before = self.wagers.len();
        self.wagers.retain(|key, _| key.connection != connection);
        before - self.wagers.len()
    }

    pub fn get(&self, connection: ConnectionId, slot: WagerSlot) -> Option<&Wager> {
        self.wagers.get(&WagerKey::new(connection, slot))
    }

    pub fn snapshot(&self) -> Vec<WagerView> {
        self.wagers.values().map(Wager::view).collect()
    }

    /// Take every wager out of the ledger, in key order.
    pub fn drain(&mut self) -> Vec<Wager> {
        std::mem::take(&mut self.wagers).into_values().collect()
    }

    pub fn clear(&mut self) {
        self.wagers.clear();
    }

    pub fn len(&self) -> usize {
        self.wagers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wagers.is_empty()
    }
}
