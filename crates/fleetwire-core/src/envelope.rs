//! Message envelope: the atomic unit of transmission.
//!
//! An envelope is an immutable value built once at the sending side and read
//! everywhere else. Routing is self-describing: no target means broadcast,
//! a correlation id means "this is the reply to that request".

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use uuid::Uuid;

use crate::node::NodeId;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wire-level message envelope.
///
/// Fields are public for read access; envelopes are never mutated after
/// construction. A reply always carries a fresh `id`, so `correlation == id`
/// cannot be produced here (the codec additionally rejects it on decode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Unique per envelope, generated at creation.
    pub id: Uuid,
    /// Discriminator naming the logical message/channel.
    pub msg_type: String,
    /// Creation instant, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Originating process.
    pub source: NodeId,
    /// Delivery target; `None` means broadcast semantics.
    pub target: Option<NodeId>,
    /// Present iff this envelope is the reply to the envelope with that id.
    pub correlation: Option<Uuid>,
    /// Time-to-live in milliseconds; `0` never expires.
    pub ttl_ms: u64,
    /// Opaque type-specific bytes.
    pub payload: Bytes,
}

impl Envelope {
    /// Envelope with no target (broadcast semantics).
    pub fn broadcast(
        msg_type: impl Into<String>,
        source: NodeId,
        payload: Bytes,
        ttl_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            msg_type: msg_type.into(),
            timestamp_ms: now_ms(),
            source,
            target: None,
            correlation: None,
            ttl_ms,
            payload,
        }
    }

    /// Envelope addressed to a single node.
    pub fn unicast(
        msg_type: impl Into<String>,
        source: NodeId,
        target: NodeId,
        payload: Bytes,
        ttl_ms: u64,
    ) -> Self {
        Self {
            target: Some(target),
            ..Self::broadcast(msg_type, source, payload, ttl_ms)
        }
    }

    /// Envelope correlated to a previous request id.
    ///
    /// Used when the original request envelope is no longer at hand but its
    /// id and source are.
    pub fn correlated(
        msg_type: impl Into<String>,
        source: NodeId,
        target: NodeId,
        correlation: Uuid,
        payload: Bytes,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            msg_type: msg_type.into(),
            timestamp_ms: now_ms(),
            source,
            target: Some(target),
            correlation: Some(correlation),
            ttl_ms: 0,
            payload,
        }
    }

    /// Reply to `request`: correlated to its id, addressed to its source,
    /// carried on the same channel.
    pub fn reply(request: &Envelope, source: NodeId, payload: Bytes) -> Self {
        Self::correlated(
            request.msg_type.clone(),
            source,
            request.source.clone(),
            request.id,
            payload,
        )
    }

    /// Whether this envelope is a reply to a previous request.
    pub fn is_reply(&self) -> bool {
        self.correlation.is_some()
    }

    /// Expiry check against an explicit clock reading.
    ///
    /// Expired iff `ttl_ms > 0 && now > timestamp_ms + ttl_ms`. Receivers
    /// must drop expired envelopes before dispatch.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.ttl_ms > 0 && now_ms > self.timestamp_ms.saturating_add(self.ttl_ms)
    }

    /// Expiry check against the current wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }
}
