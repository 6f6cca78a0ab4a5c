//! In-process channel adapter.
//!
//! A [`MemoryHub`] wires several fabrics in one process together through
//! shared registries: per-node channel callbacks, a session index, and a
//! mutable directory. Delivery is synchronous and lossless except where a
//! link is marked unreachable, which makes it both the test double for the
//! fabric and a reference for what a real adapter must provide.
//!
//! Broadcast never loops back to the sending node, matching broker
//! semantics: local subscribers are not fed their own broadcasts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};

use fleetwire_core::error::{FleetwireError, Result};
use fleetwire_core::node::{NodeId, SessionId};

use crate::adapter::{ChannelAdapter, InboundCallback, ServerInfo};

#[derive(Default)]
struct NodeEndpoint {
    connected: AtomicBool,
    channels: DashSet<String>,
    callbacks: DashMap<String, InboundCallback>,
}

/// Shared switchboard connecting [`MemoryAdapter`] instances.
#[derive(Default)]
pub struct MemoryHub {
    nodes: DashMap<NodeId, Arc<NodeEndpoint>>,
    sessions: DashMap<SessionId, NodeId>,
    directory: DashMap<NodeId, ServerInfo>,
    unreachable: DashSet<NodeId>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route a session id to a node for `send_to_session`.
    pub fn bind_session(&self, session: impl Into<SessionId>, node: impl Into<NodeId>) {
        self.sessions.insert(session.into(), node.into());
    }

    /// Replace a directory entry (load, groups, latency).
    pub fn set_server_info(&self, info: ServerInfo) {
        self.directory.insert(info.node.clone(), info);
    }

    /// Failure injection: sends *to* this node fail with `Transport` while
    /// set. Broadcasts skip it silently, like an unreachable peer.
    pub fn set_unreachable(&self, node: &NodeId, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(node.clone());
        } else {
            self.unreachable.remove(node);
        }
    }

    fn endpoint(&self, node: &NodeId) -> Option<Arc<NodeEndpoint>> {
        self.nodes.get(node).map(|e| Arc::clone(e.value()))
    }
}

/// One node's view of the hub.
pub struct MemoryAdapter {
    hub: Arc<MemoryHub>,
    local: NodeId,
}

impl MemoryAdapter {
    /// Adapter speaking for `node` on `hub`, creating its endpoint on first
    /// use.
    pub fn new(hub: Arc<MemoryHub>, node: impl Into<NodeId>) -> Arc<Self> {
        let node = node.into();
        hub.nodes
            .entry(node.clone())
            .or_insert_with(|| Arc::new(NodeEndpoint::default()));
        Arc::new(Self { hub, local: node })
    }

    fn local_endpoint(&self) -> Result<Arc<NodeEndpoint>> {
        self.hub
            .endpoint(&self.local)
            .ok_or_else(|| FleetwireError::Transport(format!("endpoint missing: {}", self.local)))
    }

    fn deliver(&self, endpoint: &NodeEndpoint, channel: &str, frame: Bytes) {
        // An unregistered channel is accepted and dropped, like a broker
        // with no binding for the routing key.
        if !endpoint.channels.contains(channel) {
            return;
        }
        let cb = endpoint.callbacks.get(channel).map(|e| Arc::clone(e.value()));
        if let Some(cb) = cb {
            cb(frame);
        }
    }
}

#[async_trait]
impl ChannelAdapter for MemoryAdapter {
    fn local_node(&self) -> NodeId {
        self.local.clone()
    }

    async fn connect(&self) -> Result<()> {
        let endpoint = self.local_endpoint()?;
        endpoint.connected.store(true, Ordering::Release);
        self.hub
            .directory
            .entry(self.local.clone())
            .or_insert_with(|| ServerInfo::online(self.local.clone()))
            .online = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let endpoint = self.local_endpoint()?;
        endpoint.connected.store(false, Ordering::Release);
        if let Some(mut info) = self.hub.directory.get_mut(&self.local) {
            info.online = false;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.hub
            .endpoint(&self.local)
            .map(|e| e.connected.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    async fn register_channel(&self, channel: &str) -> Result<()> {
        self.local_endpoint()?.channels.insert(channel.to_string());
        Ok(())
    }

    async fn unregister_channel(&self, channel: &str) -> Result<()> {
        let endpoint = self.local_endpoint()?;
        endpoint.channels.remove(channel);
        endpoint.callbacks.remove(channel);
        Ok(())
    }

    async fn subscribe(&self, channel: &str, callback: InboundCallback) -> Result<()> {
        self.local_endpoint()?
            .callbacks
            .insert(channel.to_string(), callback);
        Ok(())
    }

    async fn send_to(&self, channel: &str, node: &NodeId, frame: Bytes) -> Result<()> {
        if self.hub.unreachable.contains(node) {
            return Err(FleetwireError::Transport(format!("node unreachable: {node}")));
        }
        let endpoint = self
            .hub
            .endpoint(node)
            .ok_or_else(|| FleetwireError::Transport(format!("unknown node: {node}")))?;
        if !endpoint.connected.load(Ordering::Acquire) {
            return Err(FleetwireError::Transport(format!("node offline: {node}")));
        }
        self.deliver(&endpoint, channel, frame);
        Ok(())
    }

    async fn broadcast(&self, channel: &str, frame: Bytes) -> Result<()> {
        let peers: Vec<Arc<NodeEndpoint>> = self
            .hub
            .nodes
            .iter()
            .filter(|e| *e.key() != self.local)
            .filter(|e| !self.hub.unreachable.contains(e.key()))
            .map(|e| Arc::clone(e.value()))
            .collect();
        for endpoint in peers {
            if endpoint.connected.load(Ordering::Acquire) {
                self.deliver(&endpoint, channel, frame.clone());
            }
        }
        Ok(())
    }

    async fn send_to_session(
        &self,
        channel: &str,
        session: &SessionId,
        frame: Bytes,
    ) -> Result<()> {
        let node = self
            .hub
            .sessions
            .get(session)
            .map(|e| e.value().clone())
            .ok_or_else(|| FleetwireError::Transport(format!("unknown session: {session}")))?;
        self.send_to(channel, &node, frame).await
    }

    async fn server_ids(&self) -> Result<HashSet<NodeId>> {
        Ok(self
            .hub
            .nodes
            .iter()
            .filter(|e| e.value().connected.load(Ordering::Acquire))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn servers(&self) -> Result<Vec<ServerInfo>> {
        Ok(self.hub.directory.iter().map(|e| e.value().clone()).collect())
    }
}
