//! Pending-request correlation table.
//!
//! Keyed by the originating envelope id. Completion is remove-then-send:
//! whichever of {reply, timeout, send failure, disconnect} removes the entry
//! first is the one resolution the caller observes.

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use fleetwire_core::envelope::Envelope;
use fleetwire_core::error::{FleetwireError, Result};

type ReplySender = oneshot::Sender<Result<Envelope>>;

#[derive(Default)]
pub(crate) struct PendingRequests {
    table: DashMap<Uuid, ReplySender>,
}

impl PendingRequests {
    /// Register a request id; the receiver resolves with the reply envelope
    /// or a terminal error.
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<Result<Envelope>> {
        let (tx, rx) = oneshot::channel();
        self.table.insert(id, tx);
        rx
    }

    /// Atomically remove and complete. Returns false when no entry matches —
    /// a stale or duplicate reply the caller should drop silently.
    pub fn complete(&self, id: Uuid, env: Envelope) -> bool {
        match self.table.remove(&id) {
            Some((_, tx)) => tx.send(Ok(env)).is_ok(),
            None => false,
        }
    }

    /// Remove without completing (timeout or send failure). Idempotent;
    /// returns whether the entry was still present.
    pub fn forget(&self, id: Uuid) -> bool {
        self.table.remove(&id).is_some()
    }

    /// Fail every outstanding request with `Disconnected`.
    pub fn abort_all(&self) {
        let ids: Vec<Uuid> = self.table.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.table.remove(&id) {
                let _ = tx.send(Err(FleetwireError::Disconnected));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}
