//! Fabric service core.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use fleetwire_core::envelope::Envelope;
use fleetwire_core::error::{FleetwireError, Result};
use fleetwire_core::node::{NodeId, SessionId};
use fleetwire_core::wire;

use crate::adapter::{ChannelAdapter, InboundCallback, NodeSelector, ServerInfo};
use crate::channel::{ChannelStats, FabricMessage, Inbound, MessageChannel, Subscription};
use crate::config::FabricConfig;
use crate::fabric::pending::PendingRequests;

/// State shared between the service and every channel it owns.
pub(crate) struct FabricShared {
    pub(crate) adapter: Arc<dyn ChannelAdapter>,
    pub(crate) pending: PendingRequests,
    pub(crate) default_timeout_ms: AtomicU64,
    pub(crate) max_payload_bytes: usize,
    pub(crate) local: NodeId,
}

impl FabricShared {
    pub(crate) fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.load(Ordering::Relaxed))
    }
}

/// Type-erased registry slot for one channel.
struct ChannelEntry {
    /// The concrete `MessageChannel<T>`, recovered by downcast on lookup.
    channel: Box<dyn Any + Send + Sync>,
    dispatch: Arc<dyn Fn(&Envelope) + Send + Sync>,
    close: Arc<dyn Fn() + Send + Sync>,
    stats: Arc<ChannelStats>,
}

struct FabricInner {
    shared: Arc<FabricShared>,
    channels: DashMap<&'static str, ChannelEntry>,
    decode_errors: AtomicU64,
}

/// Top-level messaging service: registry of channels, pending-request table,
/// node directory access, and lifecycle.
///
/// Instances are independent — several fabrics (each with its own adapter)
/// coexist in one process without interference, which is exactly how the
/// integration tests run a multi-node fleet.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Fabric {
    pub fn new(adapter: Arc<dyn ChannelAdapter>, config: FabricConfig) -> Self {
        let local = adapter.local_node();
        let shared = Arc::new(FabricShared {
            adapter,
            pending: PendingRequests::default(),
            default_timeout_ms: AtomicU64::new(config.request_timeout_ms),
            max_payload_bytes: config.max_payload_bytes,
            local,
        });
        Self {
            inner: Arc::new(FabricInner {
                shared,
                channels: DashMap::new(),
                decode_errors: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_defaults(adapter: Arc<dyn ChannelAdapter>) -> Self {
        Self::new(adapter, FabricConfig::default())
    }

    // ------------------------------------------------------------------
    // Channel registry
    // ------------------------------------------------------------------

    /// Idempotent lookup-or-create of the channel for `T`.
    ///
    /// Creation registers the name with the adapter and installs the
    /// decode-and-dispatch callback. A name already bound to a different
    /// payload type fails with `UnknownChannel`.
    pub async fn channel<T: FabricMessage>(&self) -> Result<MessageChannel<T>> {
        let name = T::channel();
        if let Some(entry) = self.inner.channels.get(name) {
            return downcast_channel::<T>(&entry, name);
        }

        let ch = MessageChannel::<T>::new(Arc::clone(&self.inner.shared));
        self.inner.shared.adapter.register_channel(name).await?;
        let weak = Arc::downgrade(&self.inner);
        let callback: InboundCallback = Arc::new(move |frame: Bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(frame);
            }
        });
        self.inner.shared.adapter.subscribe(name, callback).await?;

        let entry = ChannelEntry {
            channel: Box::new(ch.clone()),
            dispatch: {
                let ch = ch.clone();
                Arc::new(move |env: &Envelope| ch.dispatch(env))
            },
            close: {
                let ch = ch.clone();
                Arc::new(move || ch.close())
            },
            stats: ch.stats_handle(),
        };
        match self.inner.channels.entry(name) {
            Entry::Occupied(existing) => {
                // Lost a concurrent creation race; keep the installed one.
                downcast_channel::<T>(existing.get(), name)
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(ch)
            }
        }
    }

    // ------------------------------------------------------------------
    // Service-level sends
    // ------------------------------------------------------------------

    pub async fn broadcast<T: FabricMessage>(&self, payload: &T) -> Result<()> {
        self.channel::<T>().await?.broadcast(payload).await
    }

    pub async fn send_to<T: FabricMessage>(&self, node: &NodeId, payload: &T) -> Result<()> {
        self.channel::<T>().await?.send_to(node, payload).await
    }

    pub async fn send_to_many<T: FabricMessage>(
        &self,
        targets: &[NodeId],
        payload: &T,
    ) -> Result<()> {
        self.channel::<T>().await?.send_to_many(targets, payload).await
    }

    pub async fn send_excluding<T: FabricMessage>(
        &self,
        excluded: &[NodeId],
        payload: &T,
    ) -> Result<()> {
        self.channel::<T>().await?.send_excluding(excluded, payload).await
    }

    pub async fn send_to_session<T: FabricMessage>(
        &self,
        session: &SessionId,
        payload: &T,
    ) -> Result<()> {
        self.channel::<T>().await?.send_to_session(session, payload).await
    }

    /// Request against the payload's channel; see
    /// [`MessageChannel::request`] for target/timeout semantics.
    pub async fn request<Req, Resp>(
        &self,
        target: Option<NodeId>,
        payload: &Req,
        window: Option<Duration>,
    ) -> Result<Resp>
    where
        Req: FabricMessage,
        Resp: DeserializeOwned,
    {
        self.channel::<Req>().await?.request(target, payload, window).await
    }

    /// Serve requests arriving on `Req`'s channel.
    ///
    /// Each inbound request runs `handler` on its own task; the result is
    /// sent back correlated to the request id and addressed to its source.
    /// Handler failures are counted on the channel and logged, never
    /// propagated to the requester's transport.
    pub async fn handle_requests<Req, Resp, F, Fut>(&self, handler: F) -> Result<Subscription>
    where
        Req: FabricMessage + Clone,
        Resp: Serialize + Send + 'static,
        F: Fn(Inbound<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let ch = self.channel::<Req>().await?;
        let shared = Arc::clone(&self.inner.shared);
        let stats = ch.stats_handle();
        let handler = Arc::new(handler);

        ch.subscribe(move |msg: &Inbound<Req>| {
            let shared = Arc::clone(&shared);
            let stats = Arc::clone(&stats);
            let handler = Arc::clone(&handler);
            let msg = msg.clone();
            tokio::spawn(async move {
                let channel = Req::channel();
                let request_id = msg.envelope_id;
                let reply_to = msg.source.clone();
                let body = match handler(msg).await {
                    Ok(resp) => match serde_json::to_vec(&resp) {
                        Ok(raw) => Bytes::from(raw),
                        Err(e) => {
                            stats.record_error();
                            tracing::warn!(channel, error = %e, "reply encode failed");
                            return;
                        }
                    },
                    Err(e) => {
                        stats.record_error();
                        tracing::warn!(channel, error = %e, "request handler failed");
                        return;
                    }
                };
                let env = Envelope::correlated(
                    channel,
                    shared.local.clone(),
                    reply_to.clone(),
                    request_id,
                    body,
                );
                match wire::encode(&env) {
                    Ok(frame) => {
                        let len = frame.len();
                        match shared.adapter.send_to(channel, &reply_to, frame).await {
                            Ok(()) => stats.record_sent(len),
                            Err(e) => {
                                stats.record_error();
                                tracing::warn!(channel, error = %e, "reply send failed");
                            }
                        }
                    }
                    Err(e) => {
                        stats.record_error();
                        tracing::warn!(channel, error = %e, "reply frame encode failed");
                    }
                }
            });
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------

    pub async fn servers(&self) -> Result<Vec<ServerInfo>> {
        self.inner.shared.adapter.servers().await
    }

    pub async fn server(&self, id: &NodeId) -> Result<Option<ServerInfo>> {
        self.inner.shared.adapter.server(id).await
    }

    pub async fn server_ids(&self) -> Result<HashSet<NodeId>> {
        self.inner.shared.adapter.server_ids().await
    }

    /// Online nodes matching a selector, from the current directory snapshot.
    pub async fn select_nodes(&self, selector: &NodeSelector) -> Result<Vec<NodeId>> {
        Ok(selector.select(&self.servers().await?))
    }

    // ------------------------------------------------------------------
    // Settings & lifecycle
    // ------------------------------------------------------------------

    pub fn local_node(&self) -> NodeId {
        self.inner.shared.local.clone()
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.shared.default_timeout()
    }

    pub fn set_default_timeout(&self, window: Duration) {
        self.inner
            .shared
            .default_timeout_ms
            .store(window.as_millis() as u64, Ordering::Relaxed);
    }

    /// Outstanding request count (diagnostics; empty after every settled call).
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.pending.len()
    }

    /// Frames dropped because they failed structural decoding.
    pub fn decode_errors(&self) -> u64 {
        self.inner.decode_errors.load(Ordering::Relaxed)
    }

    pub async fn connect(&self) -> Result<()> {
        self.inner.shared.adapter.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.adapter.is_connected()
    }

    /// Close every owned channel, fail outstanding requests with
    /// `Disconnected`, then detach from the adapter.
    pub async fn disconnect(&self) -> Result<()> {
        let names: Vec<&'static str> = self.inner.channels.iter().map(|e| *e.key()).collect();
        for name in names {
            if let Some((_, entry)) = self.inner.channels.remove(name) {
                (entry.close)();
                if let Err(e) = self.inner.shared.adapter.unregister_channel(name).await {
                    tracing::debug!(channel = name, error = %e, "unregister on disconnect failed");
                }
            }
        }
        self.inner.shared.pending.abort_all();
        self.inner.shared.adapter.disconnect().await
    }
}

fn downcast_channel<T: FabricMessage>(
    entry: &ChannelEntry,
    name: &'static str,
) -> Result<MessageChannel<T>> {
    entry
        .channel
        .downcast_ref::<MessageChannel<T>>()
        .cloned()
        .ok_or_else(|| {
            FleetwireError::UnknownChannel(format!("{name} is bound to a different payload type"))
        })
}

impl FabricInner {
    /// Decode-and-route for every frame the adapter hands us.
    ///
    /// Routing order is load-bearing: expiry first, then correlation, then
    /// channel fan-out. A correlated reply completes its pending request and
    /// stops — it must never also reach ordinary subscribers.
    fn handle_inbound(&self, frame: Bytes) {
        let env = match wire::decode(frame) {
            Ok(env) => env,
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(code = e.code().as_str(), error = %e, "dropping undecodable frame");
                return;
            }
        };

        if env.is_expired() {
            if let Some(stats) = self.channel_stats(&env.msg_type) {
                stats.record_expired();
            }
            tracing::debug!(msg_type = %env.msg_type, "dropping expired envelope");
            return;
        }

        if let Some(correlation) = env.correlation {
            self.complete_pending(correlation, env);
            return;
        }

        // Clone the dispatcher out of the map so no registry guard is held
        // while subscription handlers run.
        let dispatch = self
            .channels
            .get(env.msg_type.as_str())
            .map(|entry| Arc::clone(&entry.dispatch));
        match dispatch {
            Some(dispatch) => dispatch(&env),
            None => {
                tracing::debug!(msg_type = %env.msg_type, "no channel registered for envelope")
            }
        }
    }

    fn channel_stats(&self, msg_type: &str) -> Option<Arc<ChannelStats>> {
        self.channels.get(msg_type).map(|entry| Arc::clone(&entry.stats))
    }

    fn complete_pending(&self, correlation: Uuid, env: Envelope) {
        let msg_type = env.msg_type.clone();
        let size = env.payload.len();
        if self.shared.pending.complete(correlation, env) {
            if let Some(stats) = self.channel_stats(&msg_type) {
                stats.record_received(size);
            }
        } else {
            // First-response-wins broadcasts make late replies routine.
            tracing::debug!(%correlation, "stale or duplicate reply dropped");
        }
    }
}
