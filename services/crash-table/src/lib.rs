//! Aviator crash table service.
//!
//! Runs one [`CrashEngine`] behind a mutex, drives it from a single tick task
//! and fans its messages out to websocket subscribers. Settled rounds are
//! archived through a [`RoundStore`] by a background writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use aviator_execution::{CrashEngine, Outbound};
use aviator_types::{ConnectionId, ServerMessage};
use axum::routing::get;
use axum::Router;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{info, warn};

pub mod config;
pub mod http;
pub mod identity;
pub mod persistence;
pub mod store;
pub mod ws;

pub use config::{build_config, Args, TableConfig};
pub use identity::{Identity, IdentityError, IdentityService, MemoryIdentityService};
pub use persistence::HistoryPersistence;
pub use store::{MemoryStore, RoundStore, SqliteStore, StoreError};

const BROADCAST_CAPACITY: usize = 1_024;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Millisecond clock anchored to the Unix epoch at startup and advanced
/// monotonically from there.
pub struct Clock {
    origin_ms: u64,
    started: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            origin_ms,
            started: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<CrashEngine>>,
    pub broadcaster: broadcast::Sender<Outbound>,
    pub identity: Arc<dyn IdentityService>,
    pub store: Arc<dyn RoundStore>,
    pub persistence: HistoryPersistence,
    pub clock: Arc<Clock>,
    next_connection: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        engine: CrashEngine,
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn RoundStore>,
        persistence: HistoryPersistence,
        clock: Arc<Clock>,
    ) -> Self {
        let (broadcaster, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            broadcaster,
            identity,
            store,
            persistence,
            clock,
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Publish messages to every subscriber. Direct messages are filtered by
    /// each connection's forwarder.
    pub fn dispatch(&self, outbound: impl IntoIterator<Item = Outbound>) {
        for message in outbound {
            // No subscribers is not an error.
            let _ = self.broadcaster.send(message);
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(http::healthz))
        .route("/api/history", get(http::history))
        .route("/api/stats", get(http::stats))
        .route("/api/rounds", get(http::rounds))
        .route("/api/top-wagers", get(http::top_wagers))
        .route("/api/verify", get(http::verify))
        .with_state(state)
}

/// Recent crash points from the store, most recent first. A store failure
/// starts the table with an empty history.
pub fn load_history(store: &dyn RoundStore, window: usize) -> Vec<f64> {
    match store.recent_crash_points(window) {
        Ok(points) => points,
        Err(err) => {
            warn!("failed to load crash history: {err}");
            Vec::new()
        }
    }
}

/// Wire up the store, identities, persistence and engine from configuration.
pub fn build_state(config: &TableConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn RoundStore> = match &config.database_path {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("open round store {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let history = load_history(store.as_ref(), config.engine.history_window);

    let accounts = match &config.accounts_file {
        Some(path) => identity::load_accounts(path)?,
        None => Vec::new(),
    };
    info!(accounts = accounts.len(), "loaded player accounts");
    let identity = Arc::new(MemoryIdentityService::new(config.demo_balance, accounts));

    let (persistence, _worker) = HistoryPersistence::start(store.clone(), config.persistence_buffer);

    let clock = Arc::new(Clock::new());
    let engine = CrashEngine::new(config.engine, StdRng::from_entropy(), clock.now_ms())
        .context("start crash engine")?
        .with_history(history);

    Ok(AppState::new(engine, identity, store, persistence, clock))
}

/// Process one tick at `now_ms` and deliver its effects.
///
/// Returns the delay until the next tick is due.
pub fn process_tick(state: &AppState, now_ms: u64) -> anyhow::Result<u64> {
    let (output, delay) = {
        let mut engine = lock(&state.engine);
        let output = engine
            .tick(now_ms)
            .context("crash point generation failed")?;
        (output, engine.next_tick_delay_ms(now_ms))
    };

    let mut outbound = output.outbound;
    for credit in output.credits {
        match state.identity.adjust_balance(&credit.user_id, credit.payout) {
            Ok(balance) => outbound.push(Outbound::direct(
                credit.connection,
                ServerMessage::Balance { balance },
            )),
            Err(err) => warn!(
                user_id = %credit.user_id,
                payout = credit.payout,
                "failed to credit auto cash out: {err}"
            ),
        }
    }
    state.dispatch(outbound);

    if let Some(settlement) = output.settlement {
        state.persistence.persist(settlement);
    }
    Ok(delay)
}

/// Drive the engine until a tick fails. A failed tick means crash points can
/// no longer be generated and the table must stop.
pub async fn run_ticks(state: AppState) -> anyhow::Result<()> {
    loop {
        let delay = process_tick(&state, state.clock.now_ms())?;
        time::sleep(Duration::from_millis(delay.max(1))).await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use aviator_execution::mocks::{seeded_rng, test_seed};
    use aviator_execution::{EngineConfig, FairnessGenerator};
    use crate::identity::AccountEntry;

    pub fn state_with(store: Arc<dyn RoundStore>) -> AppState {
        let engine = CrashEngine::with_fairness(
            EngineConfig::default(),
            seeded_rng(11),
            FairnessGenerator::from_seed(test_seed()),
            0,
        )
        .unwrap();
        let identity = Arc::new(MemoryIdentityService::new(
            1_000.0,
            vec![AccountEntry {
                token: "secret".to_string(),
                user_id: "alice".to_string(),
                name: "Alice".to_string(),
                avatar: String::new(),
                balance: 100.0,
            }],
        ));
        let (persistence, _worker) = HistoryPersistence::start(store.clone(), 16);
        AppState::new(engine, identity, store, persistence, Arc::new(Clock::new()))
    }

    pub fn state() -> AppState {
        state_with(Arc::new(MemoryStore::new()))
    }
}
