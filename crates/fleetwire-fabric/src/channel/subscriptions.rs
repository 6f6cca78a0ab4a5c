//! Subscription arena.
//!
//! Handles are kept in an id-indexed map rather than a copy-on-write list:
//! cancellation removes the entry and clears its active flag, so a dispatch
//! pass snapshotting the arena concurrently either misses the entry or sees
//! it inactive. No new dispatch pass invokes a handler after `cancel`
//! returns; an in-flight pass over a stale snapshot may still finish.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use fleetwire_core::error::Result;

use crate::channel::message::Inbound;
use crate::channel::stats::ChannelStats;

/// Predicate over a delivery; only matching payloads reach the handler.
pub(crate) type Filter<T> = Arc<dyn Fn(&Inbound<T>) -> bool + Send + Sync>;

/// Side-effecting consumer of a delivery.
pub(crate) type Handler<T> = Arc<dyn Fn(&Inbound<T>) -> Result<()> + Send + Sync>;

struct SubEntry<T> {
    id: u64,
    filter: Option<Filter<T>>,
    handler: Handler<T>,
    active: Arc<AtomicBool>,
}

/// Live subscriptions of one channel (shared by its filtered views).
pub struct SubscriptionSet<T> {
    entries: Arc<DashMap<u64, Arc<SubEntry<T>>>>,
    seq: AtomicU64,
}

impl<T> Default for SubscriptionSet<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            seq: AtomicU64::new(1),
        }
    }
}

impl<T: 'static> SubscriptionSet<T> {
    pub(crate) fn insert(&self, filter: Option<Filter<T>>, handler: Handler<T>) -> Subscription {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.entries.insert(
            id,
            Arc::new(SubEntry {
                id,
                filter,
                handler,
                active: Arc::clone(&active),
            }),
        );
        let entries = Arc::clone(&self.entries);
        Subscription {
            id,
            active,
            unsubscribe: Arc::new(move |sid| {
                entries.remove(&sid);
            }),
        }
    }

    /// Invalidate and drop every entry (channel close).
    pub(crate) fn clear(&self) {
        for entry in self.entries.iter() {
            entry.value().active.store(false, Ordering::Release);
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run one delivery pass over the current snapshot.
    ///
    /// A failing or panicking handler is counted and logged, and never
    /// prevents delivery to the remaining subscriptions.
    pub(crate) fn dispatch(&self, msg: &Inbound<T>, stats: &ChannelStats, channel: &str) {
        let snapshot: Vec<Arc<SubEntry<T>>> =
            self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            if let Some(filter) = &entry.filter {
                if !filter(msg) {
                    continue;
                }
            }
            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.record_error();
                    tracing::warn!(channel, subscription = entry.id, error = %e, "handler failed");
                }
                Err(_) => {
                    stats.record_error();
                    tracing::warn!(channel, subscription = entry.id, "handler panicked");
                }
            }
        }
    }
}

/// Cancellable handle returned by `subscribe`.
///
/// Dropping the handle does not cancel the subscription; cancellation is
/// explicit, or implicit through channel close.
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    unsubscribe: Arc<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once cancelled or the owning channel closed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Idempotent; safe to call concurrently with active dispatch.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
        (self.unsubscribe)(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
