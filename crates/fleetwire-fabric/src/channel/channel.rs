//! The typed channel surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use fleetwire_core::envelope::Envelope;
use fleetwire_core::error::{FleetwireError, Result};
use fleetwire_core::node::{NodeId, SessionId};
use fleetwire_core::wire;

use crate::channel::message::{FabricMessage, Inbound};
use crate::channel::stats::{ChannelStats, StatsSnapshot};
use crate::channel::subscriptions::{Filter, Handler, Subscription, SubscriptionSet};
use crate::fabric::FabricShared;

pub(crate) struct ChannelInner<T> {
    name: &'static str,
    subs: SubscriptionSet<T>,
    stats: Arc<ChannelStats>,
    open: AtomicBool,
}

/// A named, strongly-typed conduit bound to one payload type.
///
/// Cloning is cheap and shares the underlying channel. A *filtered view*
/// (from [`filter`](Self::filter), [`from_node`](Self::from_node),
/// [`broadcasts_only`](Self::broadcasts_only)) shares the parent's
/// subscription arena and stats but does not own its lifecycle: closing a
/// view is a no-op on the parent.
pub struct MessageChannel<T: FabricMessage> {
    shared: Arc<FabricShared>,
    inner: Arc<ChannelInner<T>>,
    view_filter: Option<Filter<T>>,
    owned: bool,
}

impl<T: FabricMessage> std::fmt::Debug for MessageChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("name", &self.inner.name)
            .field("owned", &self.owned)
            .field("filtered", &self.view_filter.is_some())
            .finish()
    }
}

impl<T: FabricMessage> Clone for MessageChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            inner: Arc::clone(&self.inner),
            view_filter: self.view_filter.clone(),
            owned: self.owned,
        }
    }
}

impl<T: FabricMessage> MessageChannel<T> {
    pub(crate) fn new(shared: Arc<FabricShared>) -> Self {
        Self {
            shared,
            inner: Arc::new(ChannelInner {
                name: T::channel(),
                subs: SubscriptionSet::default(),
                stats: Arc::new(ChannelStats::default()),
                open: AtomicBool::new(true),
            }),
            view_filter: None,
            owned: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Whether this handle is a non-owning filtered view.
    pub fn is_view(&self) -> bool {
        !self.owned
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub(crate) fn stats_handle(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.inner.stats)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FleetwireError::ChannelClosed(self.inner.name.to_string()))
        }
    }

    fn encode_payload(&self, payload: &T) -> Result<Bytes> {
        let raw = serde_json::to_vec(payload)
            .map_err(|e| FleetwireError::PayloadCodec(format!("encode: {e}")))?;
        if raw.len() > self.shared.max_payload_bytes {
            return Err(FleetwireError::PayloadTooLarge {
                len: raw.len(),
                max: self.shared.max_payload_bytes,
            });
        }
        Ok(Bytes::from(raw))
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Broadcast to every other node listening on the channel. Resolves when
    /// the adapter accepts the write, not when any remote handler runs.
    pub async fn broadcast(&self, payload: &T) -> Result<()> {
        self.ensure_open()?;
        let body = self.encode_payload(payload)?;
        let env = Envelope::broadcast(self.inner.name, self.shared.local.clone(), body, 0);
        let frame = wire::encode(&env)?;
        let len = frame.len();
        self.shared.adapter.broadcast(self.inner.name, frame).await?;
        self.inner.stats.record_sent(len);
        Ok(())
    }

    /// Unicast to a single node.
    pub async fn send_to(&self, node: &NodeId, payload: &T) -> Result<()> {
        self.ensure_open()?;
        let body = self.encode_payload(payload)?;
        let env = Envelope::unicast(
            self.inner.name,
            self.shared.local.clone(),
            node.clone(),
            body,
            0,
        );
        let frame = wire::encode(&env)?;
        let len = frame.len();
        self.shared.adapter.send_to(self.inner.name, node, frame).await?;
        self.inner.stats.record_sent(len);
        Ok(())
    }

    /// Independent unicast sends to every target, driven concurrently.
    ///
    /// Completes only when all sends settle. A failing send does not cancel
    /// its siblings; any failure yields an aggregate `Transport` error naming
    /// the nodes that failed.
    pub async fn send_to_many(&self, targets: &[NodeId], payload: &T) -> Result<()> {
        self.ensure_open()?;
        let body = self.encode_payload(payload)?;

        let mut sends = FuturesUnordered::new();
        for node in targets {
            let env = Envelope::unicast(
                self.inner.name,
                self.shared.local.clone(),
                node.clone(),
                body.clone(),
                0,
            );
            let frame = wire::encode(&env)?;
            let adapter = Arc::clone(&self.shared.adapter);
            let stats = Arc::clone(&self.inner.stats);
            let name = self.inner.name;
            let node = node.clone();
            sends.push(async move {
                let len = frame.len();
                match adapter.send_to(name, &node, frame).await {
                    Ok(()) => {
                        stats.record_sent(len);
                        None
                    }
                    Err(e) => Some(format!("{node}: {e}")),
                }
            });
        }

        let mut failed = Vec::new();
        while let Some(outcome) = sends.next().await {
            if let Some(f) = outcome {
                failed.push(f);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(FleetwireError::Transport(format!(
                "{} of {} sends failed: {}",
                failed.len(),
                targets.len(),
                failed.join("; ")
            )))
        }
    }

    /// Unicast to every known node except `excluded` and self.
    pub async fn send_excluding(&self, excluded: &[NodeId], payload: &T) -> Result<()> {
        self.ensure_open()?;
        let targets: Vec<NodeId> = self
            .shared
            .adapter
            .server_ids()
            .await?
            .into_iter()
            .filter(|n| *n != self.shared.local && !excluded.contains(n))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        self.send_to_many(&targets, payload).await
    }

    /// Deliver to a session-addressed recipient (adapter-routed).
    pub async fn send_to_session(&self, session: &SessionId, payload: &T) -> Result<()> {
        self.ensure_open()?;
        let body = self.encode_payload(payload)?;
        let env = Envelope::broadcast(self.inner.name, self.shared.local.clone(), body, 0);
        let frame = wire::encode(&env)?;
        let len = frame.len();
        self.shared
            .adapter
            .send_to_session(self.inner.name, session, frame)
            .await?;
        self.inner.stats.record_sent(len);
        Ok(())
    }

    /// Send a request and await the correlated reply.
    ///
    /// `target = None` broadcasts the request; the first reply wins and late
    /// replies are silently dropped. With zero reachable responders the call
    /// waits out the window and fails with `Timeout` — indistinguishable, by
    /// design, from all responders being slow.
    ///
    /// Exactly one of {reply, `Timeout`, `Transport`, `Disconnected`} reaches
    /// the caller, even when a reply races the timer.
    pub async fn request<R: DeserializeOwned>(
        &self,
        target: Option<NodeId>,
        payload: &T,
        window: Option<Duration>,
    ) -> Result<R> {
        self.ensure_open()?;
        let window = window.unwrap_or_else(|| self.shared.default_timeout());
        let body = self.encode_payload(payload)?;
        let ttl = window.as_millis() as u64;
        let env = match &target {
            Some(node) => Envelope::unicast(
                self.inner.name,
                self.shared.local.clone(),
                node.clone(),
                body,
                ttl,
            ),
            None => Envelope::broadcast(self.inner.name, self.shared.local.clone(), body, ttl),
        };
        let frame = wire::encode(&env)?;
        let len = frame.len();

        let mut rx = self.shared.pending.register(env.id);

        let sent = match &target {
            Some(node) => self.shared.adapter.send_to(self.inner.name, node, frame).await,
            None => self.shared.adapter.broadcast(self.inner.name, frame).await,
        };
        if let Err(e) = sent {
            self.shared.pending.forget(env.id);
            return Err(e);
        }
        self.inner.stats.record_sent(len);

        let reply = match timeout(window, &mut rx).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(_)) => return Err(FleetwireError::Disconnected),
            Err(_elapsed) => {
                if self.shared.pending.forget(env.id) {
                    return Err(FleetwireError::Timeout);
                }
                // A reply won the race against the timer: the completer has
                // already removed the entry, so the send is in flight or done.
                match rx.await {
                    Ok(outcome) => outcome?,
                    Err(_) => return Err(FleetwireError::Timeout),
                }
            }
        };
        serde_json::from_slice(&reply.payload)
            .map_err(|e| FleetwireError::PayloadCodec(format!("response decode: {e}")))
    }

    // ------------------------------------------------------------------
    // Subscriptions & views
    // ------------------------------------------------------------------

    /// Register a handler for every delivery this handle's view admits.
    pub fn subscribe<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&Inbound<T>) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe_inner(None, Arc::new(handler))
    }

    /// Register a handler behind an additional predicate.
    pub fn subscribe_filtered<P, F>(&self, filter: P, handler: F) -> Result<Subscription>
    where
        P: Fn(&Inbound<T>) -> bool + Send + Sync + 'static,
        F: Fn(&Inbound<T>) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe_inner(Some(Arc::new(filter)), Arc::new(handler))
    }

    fn subscribe_inner(&self, filter: Option<Filter<T>>, handler: Handler<T>) -> Result<Subscription> {
        self.ensure_open()?;
        let filter = match (&self.view_filter, filter) {
            (Some(view), Some(extra)) => {
                let view = Arc::clone(view);
                let combined: Filter<T> = Arc::new(move |msg| view(msg) && extra(msg));
                Some(combined)
            }
            (Some(view), None) => Some(Arc::clone(view)),
            (None, extra) => extra,
        };
        Ok(self.inner.subs.insert(filter, handler))
    }

    /// Non-owning view admitting only deliveries matching `predicate`.
    pub fn filter<P>(&self, predicate: P) -> MessageChannel<T>
    where
        P: Fn(&Inbound<T>) -> bool + Send + Sync + 'static,
    {
        let extra: Filter<T> = Arc::new(predicate);
        let composed: Filter<T> = match &self.view_filter {
            Some(view) => {
                let view = Arc::clone(view);
                Arc::new(move |msg| view(msg) && extra(msg))
            }
            None => extra,
        };
        MessageChannel {
            shared: Arc::clone(&self.shared),
            inner: Arc::clone(&self.inner),
            view_filter: Some(composed),
            owned: false,
        }
    }

    /// View of deliveries originating from one node.
    pub fn from_node(&self, node: impl Into<NodeId>) -> MessageChannel<T> {
        let node = node.into();
        self.filter(move |msg| msg.source == node)
    }

    /// View of broadcast deliveries only.
    pub fn broadcasts_only(&self) -> MessageChannel<T> {
        self.filter(|msg| msg.is_broadcast())
    }

    // ------------------------------------------------------------------
    // Lifecycle & dispatch
    // ------------------------------------------------------------------

    /// Idempotent. Cancels every owned subscription and rejects further
    /// operations with `ChannelClosed`. On a view this is a no-op.
    pub fn close(&self) {
        if !self.owned {
            return;
        }
        self.inner.open.store(false, Ordering::Release);
        self.inner.subs.clear();
    }

    /// Fan an inbound envelope out to the live subscriptions.
    pub(crate) fn dispatch(&self, env: &Envelope) {
        if !self.is_open() {
            return;
        }
        let payload: T = match serde_json::from_slice(&env.payload) {
            Ok(p) => p,
            Err(e) => {
                self.inner.stats.record_error();
                tracing::warn!(channel = self.inner.name, error = %e, "payload decode failed");
                return;
            }
        };
        self.inner.stats.record_received(env.payload.len());
        let msg = Inbound {
            payload,
            envelope_id: env.id,
            source: env.source.clone(),
            target: env.target.clone(),
            timestamp_ms: env.timestamp_ms,
        };
        self.inner.subs.dispatch(&msg, &self.inner.stats, self.inner.name);
    }
}
