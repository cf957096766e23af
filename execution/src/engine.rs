//! The crash table engine.
//!
//! `CrashEngine` owns the current round, the wager ledger and the fairness
//! generator. It never reads a clock or touches the network: every entry point
//! takes `now_ms` and returns the messages the caller should deliver.

use std::collections::VecDeque;

use aviator_types::{
    BetLimits, ConnectionId, LimitsError, Phase, RoundState, ServerMessage, WagerSlot,
};
use rand::rngs::StdRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};

use crate::curve::MultiplierCurve;
use crate::fairness::{FairnessError, FairnessGenerator};
use crate::ledger::{BetLedger, CashOut, PlaceWager, WagerError};
use crate::round::Round;
use crate::round_scheduler::{PhaseConfig, RoundScheduler, TransitionResult};
use crate::settlement::{settle, Settlement};

/// Number of crash points kept in the rolling history.
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

/// Rounds played on one seed before it is rotated out and revealed.
pub const DEFAULT_SEED_ROTATION_ROUNDS: u64 = 1_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid phase timing: {0}")]
    Phases(&'static str),
    #[error(transparent)]
    Limits(#[from] LimitsError),
    #[error("invalid multiplier curve: {0}")]
    Curve(&'static str),
    #[error("seed_rotation_rounds must be greater than zero")]
    SeedRotation,
    #[error("history_window must be greater than zero")]
    HistoryWindow,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fairness(#[from] FairnessError),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    pub phases: PhaseConfig,
    pub limits: BetLimits,
    pub curve: MultiplierCurve,
    pub seed_rotation_rounds: u64,
    pub history_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phases: PhaseConfig::default(),
            limits: BetLimits::default(),
            curve: MultiplierCurve::default(),
            seed_rotation_rounds: DEFAULT_SEED_ROTATION_ROUNDS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.phases.validate().map_err(ConfigError::Phases)?;
        self.limits.validate()?;
        self.curve.validate().map_err(ConfigError::Curve)?;
        if self.seed_rotation_rounds == 0 {
            return Err(ConfigError::SeedRotation);
        }
        if self.history_window == 0 {
            return Err(ConfigError::HistoryWindow);
        }
        Ok(())
    }
}

/// A message produced by the engine and who should receive it.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Broadcast(ServerMessage),
    Direct {
        connection: ConnectionId,
        message: ServerMessage,
    },
}

impl Outbound {
    pub fn direct(connection: ConnectionId, message: ServerMessage) -> Self {
        Outbound::Direct {
            connection,
            message,
        }
    }
}

/// Side effects of one processed tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickOutput {
    pub outbound: Vec<Outbound>,
    /// Automatic cash-outs to credit.
    pub credits: Vec<CashOut>,
    /// Present on the tick that ended the round.
    pub settlement: Option<Settlement>,
}

impl TickOutput {
    /// True when the tick was skipped by the overlap guard.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.credits.is_empty() && self.settlement.is_none()
    }
}

pub struct CrashEngine {
    config: EngineConfig,
    scheduler: RoundScheduler,
    fairness: FairnessGenerator,
    ledger: BetLedger,
    round: Round,
    /// Most recent crash point first.
    history: VecDeque<f64>,
    rng: StdRng,
    next_tick_at_ms: u64,
    last_tick_ms: Option<u64>,
}

impl CrashEngine {
    /// Start an engine on a fresh seed with its first round open for betting.
    pub fn new(config: EngineConfig, mut rng: StdRng, now_ms: u64) -> Result<Self, EngineError> {
        let fairness = FairnessGenerator::new(&mut rng);
        Self::with_fairness(config, rng, fairness, now_ms)
    }

    /// Start an engine on an existing fairness generator.
    pub fn with_fairness(
        config: EngineConfig,
        mut rng: StdRng,
        mut fairness: FairnessGenerator,
        now_ms: u64,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let draw = fairness.next_round()?;
        let round = Round::open(round_id(&mut rng), draw, now_ms);
        info!(
            round_id = %round.id,
            seed_hash = %round.seed_hash,
            nonce = round.nonce,
            "opened first round"
        );
        let scheduler = RoundScheduler::new(config.phases);
        let next_tick_at_ms = scheduler.next_tick_at(Phase::Betting, now_ms, now_ms);
        Ok(Self {
            config,
            scheduler,
            fairness,
            ledger: BetLedger::new(),
            round,
            history: VecDeque::with_capacity(config.history_window),
            rng,
            next_tick_at_ms,
            last_tick_ms: None,
        })
    }

    /// Seed the rolling history, most recent first.
    pub fn with_history(mut self, crash_points: Vec<f64>) -> Self {
        self.history = crash_points
            .into_iter()
            .take(self.config.history_window)
            .collect();
        self
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn phase(&self) -> Phase {
        self.round.phase
    }

    pub fn ledger(&self) -> &BetLedger {
        &self.ledger
    }

    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    /// Commitment of the seed currently in play.
    pub fn seed_hash(&self) -> &str {
        self.fairness.seed_hash()
    }

    /// Multiplier a manual cash-out at `now_ms` would settle at.
    pub fn live_multiplier(&self, now_ms: u64) -> f64 {
        match self.round.phase {
            Phase::Flying => self
                .config
                .curve
                .at_elapsed_ms(self.round.flight_ms(now_ms))
                .max(self.round.multiplier),
            _ => self.round.multiplier,
        }
    }

    /// Milliseconds until the next tick is due.
    pub fn next_tick_delay_ms(&self, now_ms: u64) -> u64 {
        self.next_tick_at_ms.saturating_sub(now_ms)
    }

    pub fn state_message(&self, now_ms: u64) -> ServerMessage {
        let round = &self.round;
        ServerMessage::GameState(RoundState {
            round_id: round.id.clone(),
            phase: round.phase,
            multiplier: round.multiplier,
            crash_point: (round.phase == Phase::Ended).then_some(round.crash_point),
            betting_time_left_ms: (round.phase == Phase::Betting).then(|| {
                self.scheduler
                    .betting_time_left(round.phase_started_at_ms, now_ms)
            }),
            seed_hash: round.seed_hash.clone(),
            nonce: round.nonce,
            time_ms: now_ms,
        })
    }

    pub fn wagers_message(&self) -> ServerMessage {
        ServerMessage::Wagers {
            wagers: self.ledger.snapshot(),
        }
    }

    pub fn history_message(&self) -> ServerMessage {
        ServerMessage::History {
            crash_points: self.history().collect(),
        }
    }

    pub fn limits_message(&self) -> ServerMessage {
        ServerMessage::BetLimits(self.config.limits)
    }

    /// Whether `connection` holds a wager in each slot, primary first.
    pub fn bet_state_messages(&self, connection: ConnectionId) -> Vec<ServerMessage> {
        [WagerSlot::Primary, WagerSlot::Secondary]
            .into_iter()
            .map(|slot| ServerMessage::MyBetState {
                slot,
                betted: self.ledger.get(connection, slot).is_some(),
            })
            .collect()
    }

    /// Snapshot sent to a connection when it enters the room.
    pub fn welcome(&self, connection: ConnectionId, now_ms: u64) -> Vec<ServerMessage> {
        let mut messages = vec![
            self.state_message(now_ms),
            self.wagers_message(),
            self.history_message(),
            self.limits_message(),
        ];
        messages.extend(self.bet_state_messages(connection));
        messages
    }

    /// Phase used for wager requests: betting closes at its deadline even if
    /// the tick that starts the flight has not run yet.
    fn betting_phase(&self, now_ms: u64) -> Phase {
        let round = &self.round;
        if round.phase == Phase::Betting
            && !self
                .scheduler
                .is_betting_open(round.phase, round.phase_started_at_ms, now_ms)
        {
            return Phase::Flying;
        }
        round.phase
    }

    /// Check a stake before the caller debits the player.
    pub fn validate(&self, now_ms: u64, stake: f64, balance: f64) -> Result<(), WagerError> {
        BetLedger::validate(self.betting_phase(now_ms), &self.config.limits, stake, balance)
    }

    /// Open a wager. The stake must already have been validated and debited.
    pub fn place(&mut self, now_ms: u64, request: PlaceWager) -> Result<Vec<Outbound>, WagerError> {
        let connection = request.connection;
        let slot = request.slot;
        let stake = request.stake;
        let phase = self.betting_phase(now_ms);
        self.ledger.place(phase, request)?;
        debug!(round_id = %self.round.id, %connection, slot = slot.as_str(), stake, "wager placed");
        Ok(vec![
            Outbound::direct(
                connection,
                ServerMessage::MyBetState { slot, betted: true },
            ),
            Outbound::direct(connection, ServerMessage::success("Bet placed")),
            Outbound::Broadcast(self.wagers_message()),
        ])
    }

    /// Cash out a manual request at the live multiplier.
    ///
    /// A request that arrives after the curve has passed the crash point is
    /// rejected even if the crashing tick has not been processed yet.
    pub fn cash_out(
        &mut self,
        now_ms: u64,
        connection: ConnectionId,
        slot: WagerSlot,
    ) -> Result<(CashOut, Vec<Outbound>), WagerError> {
        let multiplier = self.live_multiplier(now_ms);
        let phase = match self.round.phase {
            Phase::Flying if multiplier >= self.round.crash_point => Phase::Ended,
            phase => phase,
        };
        let cash_out = self.ledger.cash_out(phase, connection, slot, multiplier)?;
        self.round.multiplier = multiplier;
        debug!(
            round_id = %self.round.id,
            %connection,
            slot = slot.as_str(),
            multiplier,
            payout = cash_out.payout,
            "manual cash out"
        );
        let outbound = vec![
            Outbound::direct(
                connection,
                ServerMessage::success(format!("Cashed out at {multiplier:.2}x")),
            ),
            Outbound::Broadcast(self.wagers_message()),
        ];
        Ok((cash_out, outbound))
    }

    /// Forfeit every wager held by a closed connection.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Vec<Outbound> {
        let removed = self.ledger.remove_all(connection);
        if removed == 0 {
            return Vec::new();
        }
        debug!(round_id = %self.round.id, %connection, removed, "forfeited wagers on disconnect");
        vec![Outbound::Broadcast(self.wagers_message())]
    }

    /// Advance the round to `now_ms`.
    ///
    /// Ticks that arrive before the next due instant, or with a clock earlier
    /// than the last processed tick, are no-ops.
    pub fn tick(&mut self, now_ms: u64) -> Result<TickOutput, FairnessError> {
        let mut output = TickOutput::default();
        if now_ms < self.next_tick_at_ms || self.last_tick_ms.is_some_and(|last| now_ms < last) {
            return Ok(output);
        }
        self.last_tick_ms = Some(now_ms);

        match self.round.phase {
            Phase::Betting => self.tick_betting(now_ms),
            Phase::Flying => self.tick_flying(now_ms, &mut output),
            Phase::Ended => self.tick_ended(now_ms, &mut output)?,
        }
        output
            .outbound
            .push(Outbound::Broadcast(self.state_message(now_ms)));

        self.next_tick_at_ms =
            self.scheduler
                .next_tick_at(self.round.phase, self.round.phase_started_at_ms, now_ms);
        Ok(output)
    }

    fn tick_betting(&mut self, now_ms: u64) {
        let transition = self.scheduler.check_transition(
            Phase::Betting,
            self.round.phase_started_at_ms,
            now_ms,
            self.round.multiplier,
            self.round.crash_point,
        );
        if let TransitionResult::TransitionTo {
            phase,
            started_at_ms,
        } = transition
        {
            self.round.enter(phase, started_at_ms);
            self.round.multiplier = self.config.curve.at_elapsed_ms(0);
            info!(
                round_id = %self.round.id,
                wagers = self.ledger.len(),
                "round took off"
            );
        }
    }

    fn tick_flying(&mut self, now_ms: u64, output: &mut TickOutput) {
        let multiplier = self
            .config
            .curve
            .at_elapsed_ms(self.round.flight_ms(now_ms))
            .max(self.round.multiplier);
        let transition = self.scheduler.check_transition(
            Phase::Flying,
            self.round.phase_started_at_ms,
            now_ms,
            multiplier,
            self.round.crash_point,
        );

        match transition {
            TransitionResult::NoTransition => {
                self.round.multiplier = multiplier;
                let credits = self.ledger.auto_cash_outs(Phase::Flying, multiplier);
                if !credits.is_empty() {
                    for credit in &credits {
                        output.outbound.push(Outbound::direct(
                            credit.connection,
                            ServerMessage::success(format!(
                                "Auto cashed out at {:.2}x",
                                credit.multiplier
                            )),
                        ));
                    }
                    output
                        .outbound
                        .push(Outbound::Broadcast(self.wagers_message()));
                }
                output.credits = credits;
            }
            TransitionResult::TransitionTo {
                phase,
                started_at_ms,
            } => {
                self.round.multiplier = self.round.crash_point;
                self.round.enter(phase, started_at_ms);
                let settlement = settle(&self.round, self.ledger.drain(), now_ms);
                info!(
                    round_id = %self.round.id,
                    crash_point = self.round.crash_point,
                    wagers = settlement.wagers.len(),
                    total_stake = settlement.round.total_stake,
                    total_payout = settlement.round.total_payout,
                    "round crashed"
                );

                self.history.push_front(self.round.crash_point);
                self.history.truncate(self.config.history_window);

                for (connection, result) in &settlement.results {
                    output.outbound.push(Outbound::direct(
                        *connection,
                        ServerMessage::RoundResult(result.clone()),
                    ));
                }
                output
                    .outbound
                    .push(Outbound::Broadcast(self.history_message()));
                output
                    .outbound
                    .push(Outbound::Broadcast(self.wagers_message()));
                output.settlement = Some(settlement);
            }
        }
    }

    fn tick_ended(&mut self, now_ms: u64, output: &mut TickOutput) -> Result<(), FairnessError> {
        let transition = self.scheduler.check_transition(
            Phase::Ended,
            self.round.phase_started_at_ms,
            now_ms,
            self.round.multiplier,
            self.round.crash_point,
        );
        if let TransitionResult::TransitionTo { started_at_ms, .. } = transition {
            self.open_round(started_at_ms, output)?;
        }
        Ok(())
    }

    fn open_round(&mut self, now_ms: u64, output: &mut TickOutput) -> Result<(), FairnessError> {
        if self.fairness.nonce() >= self.config.seed_rotation_rounds {
            let revealed = self.fairness.rotate(&mut self.rng);
            info!(
                seed_hash = %revealed.seed_hash,
                last_nonce = revealed.last_nonce,
                next_seed_hash = %self.fairness.seed_hash(),
                "rotated server seed"
            );
            output
                .outbound
                .push(Outbound::Broadcast(ServerMessage::SeedRevealed {
                    seed: revealed.seed,
                    seed_hash: revealed.seed_hash,
                    last_nonce: revealed.last_nonce,
                }));
        }

        let draw = self.fairness.next_round()?;
        self.ledger.clear();
        self.round = Round::open(round_id(&mut self.rng), draw, now_ms);
        info!(
            round_id = %self.round.id,
            seed_hash = %self.round.seed_hash,
            nonce = self.round.nonce,
            "betting open"
        );
        debug!(round_id = %self.round.id, crash_point = self.round.crash_point, "drew crash point");

        output
            .outbound
            .push(Outbound::Broadcast(self.wagers_message()));
        Ok(())
    }
}

fn round_id(rng: &mut StdRng) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}
