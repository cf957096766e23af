//! Aviator execution layer.
//!
//! This crate contains the round engine for the crash table: the provably fair
//! crash point generator, the phase scheduler, the wager ledger and settlement.
//! Nothing here performs I/O or reads the wall clock; the table service feeds
//! `now_ms` in and delivers whatever the engine returns.
//!
//! ## Round flow
//! ```rust,ignore
//! use aviator_execution::{CrashEngine, EngineConfig};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut engine = CrashEngine::new(EngineConfig::default(), StdRng::from_entropy(), now_ms)?;
//! loop {
//!     let output = engine.tick(now_ms)?;
//!     // deliver output.outbound, credit output.credits, persist output.settlement
//!     sleep(engine.next_tick_delay_ms(now_ms));
//! }
//! ```

pub mod curve;
pub mod engine;
pub mod fairness;
pub mod ledger;
pub mod round;
pub mod round_scheduler;
pub mod settlement;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use curve::MultiplierCurve;
pub use engine::{
    ConfigError, CrashEngine, EngineConfig, EngineError, Outbound, TickOutput,
    DEFAULT_HISTORY_WINDOW, DEFAULT_SEED_ROTATION_ROUNDS,
};
pub use fairness::{
    crash_point, new_seed, seed_commitment, verify, FairDraw, FairnessError, FairnessGenerator,
    RevealedSeed,
};
pub use ledger::{BetLedger, CashOut, PlaceWager, Wager, WagerError, WagerKey, MIN_AUTO_TARGET};
pub use round::Round;
pub use round_scheduler::{PhaseConfig, RoundScheduler, TransitionResult};
pub use settlement::{settle, Settlement};
