use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use aviator_execution::{EngineConfig, MultiplierCurve, PhaseConfig};
use aviator_types::BetLimits;
use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host interface to bind.
    #[arg(long, env = "CRASH_TABLE_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(short, long, env = "CRASH_TABLE_PORT", default_value_t = 9124)]
    pub port: u16,

    /// Length of the betting window in milliseconds.
    #[arg(long, env = "CRASH_TABLE_BETTING_MS", default_value_t = 5_000)]
    pub betting_ms: u64,

    /// Pause between a crash and the next betting window in milliseconds.
    #[arg(long, env = "CRASH_TABLE_COOLDOWN_MS", default_value_t = 3_000)]
    pub cooldown_ms: u64,

    #[arg(long, env = "CRASH_TABLE_BETTING_TICK_MS", default_value_t = 100)]
    pub betting_tick_ms: u64,

    #[arg(long, env = "CRASH_TABLE_FLYING_TICK_MS", default_value_t = 50)]
    pub flying_tick_ms: u64,

    #[arg(long, env = "CRASH_TABLE_MIN_BET", default_value_t = 1.0)]
    pub min_bet: f64,

    #[arg(long, env = "CRASH_TABLE_MAX_BET", default_value_t = 1_000.0)]
    pub max_bet: f64,

    /// Rounds played on a server seed before it is rotated out and revealed.
    #[arg(long, env = "CRASH_TABLE_SEED_ROTATION_ROUNDS", default_value_t = 1_000)]
    pub seed_rotation_rounds: u64,

    /// Number of crash points kept in the rolling history.
    #[arg(long, env = "CRASH_TABLE_HISTORY_WINDOW", default_value_t = 50)]
    pub history_window: usize,

    /// Starting balance of unauthenticated demo players.
    #[arg(long, env = "CRASH_TABLE_DEMO_BALANCE", default_value_t = 1_000.0)]
    pub demo_balance: f64,

    /// Path to SQLite database for round history (in-memory when omitted).
    #[arg(long, env = "CRASH_TABLE_DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// JSON file of known player accounts.
    #[arg(long, env = "CRASH_TABLE_ACCOUNTS_FILE")]
    pub accounts_file: Option<PathBuf>,

    /// Max queued settlements awaiting persistence.
    #[arg(long, env = "CRASH_TABLE_PERSISTENCE_BUFFER", default_value_t = 1_024)]
    pub persistence_buffer: usize,

    #[arg(long, env = "CRASH_TABLE_LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}

#[derive(Clone, Debug)]
pub struct TableConfig {
    pub listen: SocketAddr,
    pub engine: EngineConfig,
    pub demo_balance: f64,
    pub database_path: Option<PathBuf>,
    pub accounts_file: Option<PathBuf>,
    pub persistence_buffer: usize,
    pub log_level: Level,
}

pub fn build_config(args: &Args) -> anyhow::Result<TableConfig> {
    let engine = EngineConfig {
        phases: PhaseConfig {
            betting_ms: args.betting_ms,
            cooldown_ms: args.cooldown_ms,
            betting_tick_ms: args.betting_tick_ms,
            flying_tick_ms: args.flying_tick_ms,
        },
        limits: BetLimits::new(args.min_bet, args.max_bet),
        curve: MultiplierCurve::default(),
        seed_rotation_rounds: args.seed_rotation_rounds,
        history_window: args.history_window,
    };
    engine.validate().context("invalid table configuration")?;

    if !args.demo_balance.is_finite() || args.demo_balance < 0.0 {
        anyhow::bail!("demo_balance must be a non-negative number");
    }
    if args.persistence_buffer == 0 {
        anyhow::bail!("persistence_buffer must be greater than zero");
    }

    Ok(TableConfig {
        listen: SocketAddr::new(args.host, args.port),
        engine,
        demo_balance: args.demo_balance,
        database_path: args.database_path.clone(),
        accounts_file: args.accounts_file.clone(),
        persistence_buffer: args.persistence_buffer,
        log_level: args.log_level,
    })
}
