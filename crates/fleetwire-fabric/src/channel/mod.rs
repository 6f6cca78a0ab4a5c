//! Typed channels over the fabric.
//!
//! A channel is a named conduit bound to one payload type. It owns the live
//! subscription arena and the per-channel counters, and exposes the send,
//! fan-out, request, and filtered-view surface described by the service.

mod channel;
mod message;
mod stats;
mod subscriptions;

pub use channel::MessageChannel;
pub use message::{FabricMessage, Inbound};
pub use stats::{ChannelStats, StatsSnapshot};
pub use subscriptions::{Subscription, SubscriptionSet};
