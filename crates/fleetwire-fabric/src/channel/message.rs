//! Payload-to-channel association and the inbound delivery context.

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use fleetwire_core::node::NodeId;

/// A payload type that travels on a fixed fabric channel.
///
/// The constant channel name is the explicit type-tag registry: the service
/// resolves `T::channel()` at registration time, no runtime type inspection.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use fleetwire_fabric::FabricMessage;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct PlayerCount {
///     players: u32,
/// }
///
/// impl FabricMessage for PlayerCount {
///     fn channel() -> &'static str {
///         "player-count"
///     }
/// }
/// ```
pub trait FabricMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Channel this message kind travels on. Unique per payload type.
    fn channel() -> &'static str;
}

/// A decoded payload plus the envelope metadata handlers may need
/// (who sent it, whether it was addressed or broadcast, when).
#[derive(Debug, Clone)]
pub struct Inbound<T> {
    pub payload: T,
    /// Id of the carrying envelope; a reply correlates to this.
    pub envelope_id: Uuid,
    pub source: NodeId,
    /// `None` for broadcast deliveries.
    pub target: Option<NodeId>,
    pub timestamp_ms: u64,
}

impl<T> Inbound<T> {
    /// Whether the envelope was broadcast rather than addressed.
    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }
}
