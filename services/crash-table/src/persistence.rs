use std::sync::Arc;
use std::thread::JoinHandle;

use aviator_execution::Settlement;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::store::RoundStore;

enum PersistRequest {
    Settlement(Box<Settlement>),
}

/// Hands settled rounds to a dedicated writer thread.
///
/// Writes are best effort: a full queue drops the settlement and a failed write
/// is logged, neither ever blocks the round loop.
#[derive(Clone)]
pub struct HistoryPersistence {
    sender: mpsc::Sender<PersistRequest>,
}

impl HistoryPersistence {
    pub fn start(store: Arc<dyn RoundStore>, buffer_size: usize) -> (Self, JoinHandle<()>) {
        let (persistence, receiver) = Self::channel(buffer_size);
        let handle = std::thread::spawn(move || {
            persistence_worker(store, receiver);
        });
        (persistence, handle)
    }

    fn channel(buffer_size: usize) -> (Self, mpsc::Receiver<PersistRequest>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a settlement. Returns false if it was dropped.
    pub fn persist(&self, settlement: Settlement) -> bool {
        let round_id = settlement.round.round_id.clone();
        match self
            .sender
            .try_send(PersistRequest::Settlement(Box::new(settlement)))
        {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%round_id, "round persistence channel full; dropping settlement");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(%round_id, "round persistence worker stopped; dropping settlement");
                false
            }
        }
    }
}

fn persistence_worker(store: Arc<dyn RoundStore>, mut receiver: mpsc::Receiver<PersistRequest>) {
    while let Some(request) = receiver.blocking_recv() {
        let PersistRequest::Settlement(settlement) = request;
        let round_id = &settlement.round.round_id;
        if let Err(err) = store.create_round_record(&settlement.round) {
            error!(%round_id, "round persistence write failed: {err}");
        }
        for wager in &settlement.wagers {
            if let Err(err) = store.create_wager_record(wager) {
                error!(%round_id, user_id = %wager.user_id, "wager persistence write failed: {err}");
            }
        }
    }
}
