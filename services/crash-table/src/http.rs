//! Read-only HTTP endpoints over the round history.
//!
//! Store failures degrade to empty results so a broken database never takes
//! the table's public pages down with it.

use aviator_execution::fairness::{self, seed_commitment, FairnessError};
use aviator_types::{RoundRecord, WagerRecord};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{RoundStore, StoreError};
use crate::{lock, AppState};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;
const STATS_WINDOW: usize = 100;
const DEFAULT_TOP_WAGERS: usize = 10;
const MAX_TOP_WAGERS: usize = 100;

pub async fn healthz() -> &'static str {
    "ok"
}

/// Run a store query off the async runtime, logging and swallowing failures.
async fn query_store<T, F>(state: &AppState, what: &'static str, query: F) -> Vec<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn RoundStore) -> Result<Vec<T>, StoreError> + Send + 'static,
{
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || query(store.as_ref())).await {
        Ok(Ok(rows)) => rows,
        Ok(Err(err)) => {
            warn!(query = what, "store query failed: {err}");
            Vec::new()
        }
        Err(err) => {
            warn!(query = what, "store query panicked: {err}");
            Vec::new()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<f64>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Json(query_store(&state, "history", move |store| store.recent_crash_points(limit)).await)
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashStats {
    pub count: usize,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
}

impl CrashStats {
    pub fn from_points(points: &[f64]) -> Self {
        if points.is_empty() {
            return Self {
                count: 0,
                average: 0.0,
                highest: 0.0,
                lowest: 0.0,
            };
        }
        let sum: f64 = points.iter().sum();
        Self {
            count: points.len(),
            average: sum / points.len() as f64,
            highest: points.iter().copied().fold(f64::MIN, f64::max),
            lowest: points.iter().copied().fold(f64::MAX, f64::min),
        }
    }
}

pub async fn stats(State(state): State<AppState>) -> Json<CrashStats> {
    let points = query_store(&state, "stats", |store| store.recent_crash_points(STATS_WINDOW)).await;
    Json(CrashStats::from_points(&points))
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    fn bounds(&self) -> (u64, u64) {
        (self.from.unwrap_or(0), self.to.unwrap_or(u64::MAX))
    }
}

pub async fn rounds(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Json<Vec<RoundRecord>> {
    let (from, to) = query.bounds();
    let mut rounds = query_store(&state, "rounds", move |store| store.rounds_between(from, to)).await;

    // The seed in play must stay secret until it is rotated out.
    let active = lock(&state.engine).seed_hash().to_string();
    for round in rounds.iter_mut().filter(|round| round.seed_hash == active) {
        round.seed.clear();
    }
    Json(rounds)
}

pub async fn top_wagers(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Json<Vec<WagerRecord>> {
    let (from, to) = query.bounds();
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TOP_WAGERS)
        .clamp(1, MAX_TOP_WAGERS);
    Json(
        query_store(&state, "top_wagers", move |store| {
            store.top_wagers_between(from, to, limit)
        })
        .await,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub seed: String,
    pub nonce: u64,
    pub crash_point: f64,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    pub expected: Option<f64>,
    pub seed_hash: String,
}

/// Recompute a crash point from a revealed seed.
pub async fn verify(Query(query): Query<VerifyQuery>) -> Json<VerifyResponse> {
    let expected = match fairness::crash_point(&query.seed, query.nonce) {
        Ok(point) => Some(point),
        Err(FairnessError::InvalidKey(err)) => {
            warn!("verify request with unusable seed: {err}");
            None
        }
    };
    Json(VerifyResponse {
        valid: fairness::verify(&query.seed, query.nonce, query.crash_point),
        expected,
        seed_hash: seed_commitment(&query.seed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support;
    use std::sync::Arc;

    fn record(round_id: &str, crash_point: f64, ended_at_ms: u64, seed_hash: &str) -> RoundRecord {
        RoundRecord {
            round_id: round_id.to_string(),
            crash_point,
            started_at_ms: ended_at_ms.saturating_sub(1_000),
            ended_at_ms,
            total_stake: 0.0,
            total_payout: 0.0,
            player_count: 0,
            seed: "secret-seed".to_string(),
            seed_hash: seed_hash.to_string(),
            nonce: 1,
        }
    }

    #[test]
    fn test_stats_from_points() {
        assert_eq!(CrashStats::from_points(&[]).count, 0);
        let stats = CrashStats::from_points(&[1.0, 2.0, 6.0]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.average, 3.0);
        assert_eq!(stats.highest, 6.0);
        assert_eq!(stats.lowest, 1.0);
    }

    #[tokio::test]
    async fn test_history_and_stats_endpoints() {
        let store = Arc::new(MemoryStore::new());
        for (i, point) in [1.5, 3.0, 1.0].into_iter().enumerate() {
            store
                .create_round_record(&record(&format!("r{i}"), point, i as u64 * 1_000, "old"))
                .unwrap();
        }
        let state = test_support::state_with(store);

        let Json(points) = history(
            State(state.clone()),
            Query(HistoryQuery { limit: Some(2) }),
        )
        .await;
        assert_eq!(points, vec![1.0, 3.0]);

        let Json(stats) = stats(State(state)).await;
        assert_eq!(stats.count, 3);
        assert_eq!(stats.highest, 3.0);
    }

    #[tokio::test]
    async fn test_rounds_redact_active_seed() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state_with(store.clone());
        let active = lock(&state.engine).seed_hash().to_string();
        store
            .create_round_record(&record("retired", 2.0, 1_000, "old-hash"))
            .unwrap();
        store
            .create_round_record(&record("live", 3.0, 2_000, &active))
            .unwrap();

        let Json(rounds) = rounds(State(state), Query(RangeQuery::default())).await;
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].seed, "secret-seed");
        assert_eq!(rounds[1].seed, "");
    }

    #[tokio::test]
    async fn test_verify_endpoint() {
        let seed = "deadbeef".repeat(8);
        let point = fairness::crash_point(&seed, 3).unwrap();

        let Json(response) = verify(Query(VerifyQuery {
            seed: seed.clone(),
            nonce: 3,
            crash_point: point,
        }))
        .await;
        assert!(response.valid);
        assert_eq!(response.expected, Some(point));
        assert_eq!(response.seed_hash, seed_commitment(&seed));

        let Json(response) = verify(Query(VerifyQuery {
            seed,
            nonce: 3,
            crash_point: point + 1.0,
        }))
        .await;
        assert!(!response.valid);
    }

    #[tokio::test]
    async fn test_top_wagers_respects_limit() {
        let store = Arc::new(MemoryStore::new());
        for payout in [5.0, 50.0, 20.0] {
            store
                .create_wager_record(&WagerRecord {
                    round_id: "r1".to_string(),
                    user_id: "alice".to_string(),
                    name: "Alice".to_string(),
                    slot: aviator_types::WagerSlot::Primary,
                    stake: 5.0,
                    target: 2.0,
                    auto: false,
                    cashed_out: true,
                    cash_out_at: Some(payout / 5.0),
                    payout,
                    created_at_ms: 1_000,
                })
                .unwrap();
        }
        let state = test_support::state_with(store);
        let Json(wagers) = top_wagers(
            State(state),
            Query(RangeQuery {
                limit: Some(2),
                ..RangeQuery::default()
            }),
        )
        .await;
        let payouts: Vec<f64> = wagers.iter().map(|wager| wager.payout).collect();
        assert_eq!(payouts, vec![50.0, 20.0]);
    }
}
