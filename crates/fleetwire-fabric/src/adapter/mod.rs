//! Channel adapter contract (transport boundary).
//!
//! The fabric never performs I/O itself: every unicast, broadcast, or
//! session delivery goes through a [`ChannelAdapter`], and every adapter call
//! is treated as fallible and asynchronous. A completed send future means
//! only that the adapter accepted the bytes for transmission — not that a
//! remote handler ran, and not that delivery is ordered with any other send.

pub mod directory;
pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use fleetwire_core::error::Result;
use fleetwire_core::node::{NodeId, SessionId};

pub use directory::{NodeSelector, ServerInfo};
pub use memory::{MemoryAdapter, MemoryHub};

/// Callback invoked by the adapter for every inbound frame on a channel.
///
/// Decoding and dispatch happen inside the callback synchronously; the
/// adapter must not assume the bytes are retained after it returns.
pub type InboundCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// The boundary any transport implementation must satisfy: an in-process
/// test double, a relay-broker adapter, or a direct socket mesh.
#[async_trait]
pub trait ChannelAdapter: Send + Sync + 'static {
    /// Identity of the process this adapter speaks for.
    fn local_node(&self) -> NodeId;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Announce a channel name to the backing network.
    async fn register_channel(&self, channel: &str) -> Result<()>;

    async fn unregister_channel(&self, channel: &str) -> Result<()>;

    /// Install the inbound callback for a channel. At most one callback per
    /// channel; a later call replaces the earlier one.
    async fn subscribe(&self, channel: &str, callback: InboundCallback) -> Result<()>;

    /// Deliver a frame to a single node.
    async fn send_to(&self, channel: &str, node: &NodeId, frame: Bytes) -> Result<()>;

    /// Deliver a frame to every other node listening on the channel.
    async fn broadcast(&self, channel: &str, frame: Bytes) -> Result<()>;

    /// Deliver a frame to a session-addressed recipient.
    async fn send_to_session(&self, channel: &str, session: &SessionId, frame: Bytes)
        -> Result<()>;

    /// Ids of nodes currently reachable through this adapter.
    async fn server_ids(&self) -> Result<HashSet<NodeId>>;

    /// Directory snapshot as known to the adapter. The fabric only reads it;
    /// membership and health are the adapter's concern.
    async fn servers(&self) -> Result<Vec<ServerInfo>>;

    /// Single directory entry, if known.
    async fn server(&self, id: &NodeId) -> Result<Option<ServerInfo>> {
        Ok(self.servers().await?.into_iter().find(|s| &s.node == id))
    }
}
