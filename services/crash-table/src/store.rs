//! Round and wager history.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use aviator_types::{RoundRecord, WagerRecord, WagerSlot};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use thiserror::Error;

use crate::lock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Where settled rounds are archived.
pub trait RoundStore: Send + Sync {
    fn create_round_record(&self, record: &RoundRecord) -> Result<(), StoreError>;

    fn create_wager_record(&self, record: &WagerRecord) -> Result<(), StoreError>;

    /// Rounds that ended within `[from_ms, to_ms]`, oldest first.
    fn rounds_between(&self, from_ms: u64, to_ms: u64) -> Result<Vec<RoundRecord>, StoreError>;

    /// Cashed-out wagers settled within `[from_ms, to_ms]`, largest payout first.
    fn top_wagers_between(
        &self,
        from_ms: u64,
        to_ms: u64,
        limit: usize,
    ) -> Result<Vec<WagerRecord>, StoreError>;

    /// Crash points of the latest rounds, most recent first.
    fn recent_crash_points(&self, limit: usize) -> Result<Vec<f64>, StoreError>;
}

/// Rounds kept by [`MemoryStore`] before the oldest are evicted.
pub const MEMORY_ROUND_RETENTION: usize = 10_000;

/// Wagers kept by [`MemoryStore`] before the oldest are evicted.
pub const MEMORY_WAGER_RETENTION: usize = 100_000;

#[derive(Default)]
struct MemoryHistory {
    /// Ordered by `ended_at_ms`, oldest first.
    rounds: VecDeque<RoundRecord>,
    wagers: VecDeque<WagerRecord>,
}

/// Store kept in process memory, lost on restart. Only the most recent
/// rounds and wagers are retained.
pub struct MemoryStore {
    history: Mutex<MemoryHistory>,
    round_retention: usize,
    wager_retention: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_retention(MEMORY_ROUND_RETENTION, MEMORY_WAGER_RETENTION)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(rounds: usize, wagers: usize) -> Self {
        Self {
            history: Mutex::new(MemoryHistory::default()),
            round_retention: rounds.max(1),
            wager_retention: wagers.max(1),
        }
    }
}

impl RoundStore for MemoryStore {
    fn create_round_record(&self, record: &RoundRecord) -> Result<(), StoreError> {
        let mut history = lock(&self.history);
        let rounds = &mut history.rounds;
        // Settlements arrive in order, so this is almost always a push to the back.
        let at = rounds.partition_point(|round| round.ended_at_ms <= record.ended_at_ms);
        rounds.insert(at, record.clone());
        while rounds.len() > self.round_retention {
            rounds.pop_front();
        }
        Ok(())
    }

    fn create_wager_record(&self, record: &WagerRecord) -> Result<(), StoreError> {
        let mut history = lock(&self.history);
        history.wagers.push_back(record.clone());
        while history.wagers.len() > self.wager_retention {
            history.wagers.pop_front();
        }
        Ok(())
    }

    fn rounds_between(&self, from_ms: u64, to_ms: u64) -> Result<Vec<RoundRecord>, StoreError> {
        Ok(lock(&self.history)
            .rounds
            .iter()
            .skip_while(|round| round.ended_at_ms < from_ms)
            .take_while(|round| round.ended_at_ms <= to_ms)
            .cloned()
            .collect())
    }

    fn top_wagers_between(
        &self,
        from_ms: u64,
        to_ms: u64,
        limit: usize,
    ) -> Result<Vec<WagerRecord>, StoreError> {
        let mut wagers: Vec<WagerRecord> = lock(&self.history)
            .wagers
            .iter()
            .filter(|wager| wager.cashed_out && (from_ms..=to_ms).contains(&wager.created_at_ms))
            .cloned()
            .collect();
        wagers.sort_by(|a, b| b.payout.total_cmp(&a.payout));
        wagers.truncate(limit);
        Ok(wagers)
    }

    fn recent_crash_points(&self, limit: usize) -> Result<Vec<f64>, StoreError> {
        Ok(lock(&self.history)
            .rounds
            .iter()
            .rev()
            .take(limit)
            .map(|round| round.crash_point)
            .collect())
    }
}

/// SQLite backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn init_schema_sqlite(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS rounds (
             round_id TEXT PRIMARY KEY,
             crash_point REAL NOT NULL,
             started_at_ms INTEGER NOT NULL,
             ended_at_ms INTEGER NOT NULL,
             total_stake REAL NOT NULL,
             total_payout REAL NOT NULL,
             player_count INTEGER NOT NULL,
             seed TEXT NOT NULL,
             seed_hash TEXT NOT NULL,
             nonce INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS rounds_ended_at ON rounds (ended_at_ms);
         CREATE TABLE IF NOT EXISTS wagers (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             round_id TEXT NOT NULL,
             user_id TEXT NOT NULL,
             name TEXT NOT NULL,
             slot TEXT NOT NULL,
             stake REAL NOT NULL,
             target REAL NOT NULL,
             auto INTEGER NOT NULL,
             cashed_out INTEGER NOT NULL,
             cash_out_at REAL,
             payout REAL NOT NULL,
             created_at_ms INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS wagers_created_at ON wagers (created_at_ms);",
    )?;
    Ok(())
}

/// SQLite integers are signed; clamp timestamps and counters into range.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<RoundRecord> {
    Ok(RoundRecord {
        round_id: row.get(0)?,
        crash_point: row.get(1)?,
        started_at_ms: from_sql_int(row.get(2)?),
        ended_at_ms: from_sql_int(row.get(3)?),
        total_stake: row.get(4)?,
        total_payout: row.get(5)?,
        player_count: row.get(6)?,
        seed: row.get(7)?,
        seed_hash: row.get(8)?,
        nonce: from_sql_int(row.get(9)?),
    })
}

fn wager_from_row(row: &Row<'_>) -> rusqlite::Result<WagerRecord> {
    let slot: String = row.get(3)?;
    let slot = WagerSlot::try_from(slot.as_str())
        .map_err(|()| rusqlite::Error::InvalidColumnType(3, "slot".to_string(), Type::Text))?;
    Ok(WagerRecord {
        round_id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        slot,
        stake: row.get(4)?,
        target: row.get(5)?,
        auto: row.get(6)?,
        cashed_out: row.get(7)?,
        cash_out_at: row.get(8)?,
        payout: row.get(9)?,
        created_at_ms: from_sql_int(row.get(10)?),
    })
}

impl RoundStore for SqliteStore {
    fn create_round_record(&self, record: &RoundRecord) -> Result<(), StoreError> {
        lock(&self.conn).execute(
            "INSERT OR REPLACE INTO rounds (round_id, crash_point, started_at_ms, ended_at_ms,
                 total_stake, total_payout, player_count, seed, seed_hash, nonce)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.round_id,
                record.crash_point,
                to_sql_int(record.started_at_ms),
                to_sql_int(record.ended_at_ms),
                record.total_stake,
                record.total_payout,
                record.player_count,
                record.seed,
                record.seed_hash,
                to_sql_int(record.nonce),
            ],
        )?;
        Ok(())
    }

    fn create_wager_record(&self, record: &WagerRecord) -> Result<(), StoreError> {
        lock(&self.conn).execute(
            "INSERT INTO wagers (round_id, user_id, name, slot, stake, target, auto,
                 cashed_out, cash_out_at, payout, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.round_id,
                record.user_id,
                record.name,
                record.slot.as_str(),
                record.stake,
                record.target,
                record.auto,
                record.cashed_out,
                record.cash_out_at,
                record.payout,
                to_sql_int(record.created_at_ms),
            ],
        )?;
        Ok(())
    }

    fn rounds_between(&self, from_ms: u64, to_ms: u64) -> Result<Vec<RoundRecord>, StoreError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT round_id, crash_point, started_at_ms, ended_at_ms, total_stake,
                 total_payout, player_count, seed, seed_hash, nonce
             FROM rounds WHERE ended_at_ms BETWEEN ? AND ? ORDER BY ended_at_ms ASC",
        )?;
        let rows = stmt.query_map(
            params![to_sql_int(from_ms), to_sql_int(to_ms)],
            round_from_row,
        )?;
        let mut rounds = Vec::new();
        for row in rows {
            rounds.push(row?);
        }
        Ok(rounds)
    }

    fn top_wagers_between(
        &self,
        from_ms: u64,
        to_ms: u64,
        limit: usize,
    ) -> Result<Vec<WagerRecord>, StoreError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT round_id, user_id, name, slot, stake, target, auto, cashed_out,
                 cash_out_at, payout, created_at_ms
             FROM wagers
             WHERE cashed_out = 1 AND created_at_ms BETWEEN ? AND ?
             ORDER BY payout DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(
            params![
                to_sql_int(from_ms),
                to_sql_int(to_ms),
                to_sql_int(limit as u64)
            ],
            wager_from_row,
        )?;
        let mut wagers = Vec::new();
        for row in rows {
            wagers.push(row?);
        }
        Ok(wagers)
    }

    fn recent_crash_points(&self, limit: usize) -> Result<Vec<f64>, StoreError> {
        let conn = lock(&self.conn);
        let mut stmt =
            conn.prepare("SELECT crash_point FROM rounds ORDER BY ended_at_ms DESC LIMIT ?")?;
        let rows = stmt.query_map(params![to_sql_int(limit as u64)], |row| row.get::<_, f64>(0))?;
        let mut points = Vec::new();
        for row in rows {
            points.push(row?);
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(id: &str, crash_point: f64, ended_at_ms: u64) -> RoundRecord {
        RoundRecord {
            round_id: id.to_string(),
            crash_point,
            started_at_ms: ended_at_ms.saturating_sub(4_000),
            ended_at_ms,
            total_stake: 10.0,
            total_payout: 0.0,
            player_count: 1,
            seed: "ab".repeat(32),
            seed_hash: "cd".repeat(32),
            nonce: 3,
        }
    }

    fn wager(round_id: &str, payout: f64, cashed_out: bool, created_at_ms: u64) -> WagerRecord {
        WagerRecord {
            round_id: round_id.to_string(),
            user_id: "demo-1".to_string(),
            name: "Guest 1".to_string(),
            slot: WagerSlot::Secondary,
            stake: 10.0,
            target: 2.0,
            auto: true,
            cashed_out,
            cash_out_at: cashed_out.then_some(payout / 10.0),
            payout,
            created_at_ms,
        }
    }

    fn exercise_store(store: &dyn RoundStore) {
        store.create_round_record(&round("r1", 1.5, 1_000)).unwrap();
        store.create_round_record(&round("r3", 7.25, 3_000)).unwrap();
        store.create_round_record(&round("r2", 1.0, 2_000)).unwrap();

        assert_eq!(store.recent_crash_points(2).unwrap(), vec![7.25, 1.0]);
        assert_eq!(store.recent_crash_points(10).unwrap().len(), 3);

        let rounds = store.rounds_between(1_500, 3_000).unwrap();
        let ids: Vec<&str> = rounds.iter().map(|round| round.round_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
        assert_eq!(rounds[1], round("r3", 7.25, 3_000));

        store.create_wager_record(&wager("r1", 15.0, true, 1_000)).unwrap();
        store.create_wager_record(&wager("r2", 0.0, false, 2_000)).unwrap();
        store.create_wager_record(&wager("r3", 72.5, true, 3_000)).unwrap();
        store.create_wager_record(&wager("r3", 20.0, true, 3_000)).unwrap();

        let top = store.top_wagers_between(0, u64::MAX, 2).unwrap();
        let payouts: Vec<f64> = top.iter().map(|wager| wager.payout).collect();
        assert_eq!(payouts, vec![72.5, 20.0]);
        assert_eq!(top[0], wager("r3", 72.5, true, 3_000));

        let early = store.top_wagers_between(0, 2_500, 10).unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].round_id, "r1");
    }

    #[test]
    fn test_memory_store_queries() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn test_memory_store_evicts_oldest() {
        let store = MemoryStore::with_retention(3, 2);
        for i in 1..=5u64 {
            store
                .create_round_record(&round(&format!("r{i}"), i as f64, i * 1_000))
                .unwrap();
            store
                .create_wager_record(&wager(&format!("r{i}"), i as f64 * 10.0, true, i * 1_000))
                .unwrap();
        }

        assert_eq!(store.recent_crash_points(10).unwrap(), vec![5.0, 4.0, 3.0]);
        let rounds = store.rounds_between(0, u64::MAX).unwrap();
        let ids: Vec<&str> = rounds.iter().map(|round| round.round_id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r4", "r5"]);

        let top = store.top_wagers_between(0, u64::MAX, 10).unwrap();
        let payouts: Vec<f64> = top.iter().map(|wager| wager.payout).collect();
        assert_eq!(payouts, vec![50.0, 40.0]);
    }

    #[test]
    fn test_sqlite_store_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("rounds.db")).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_round_record(&round("r1", 2.5, 1_000)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.recent_crash_points(50).unwrap(), vec![2.5]);
    }
}
