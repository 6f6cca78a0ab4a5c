//! Fleetwire fabric: the cross-node messaging runtime.
//!
//! This crate wires the channel adapter contract, typed channels, and the
//! messaging service into a cohesive fabric stack. It is intended to be
//! consumed by node processes and by integration tests.
//!
//! Inbound routing is correlation-first: a decoded envelope either completes
//! a pending request or fans out to channel subscriptions, never both.

pub mod adapter;
pub mod channel;
pub mod config;
pub mod fabric;

pub use adapter::{ChannelAdapter, NodeSelector, ServerInfo};
pub use channel::{ChannelStats, FabricMessage, Inbound, MessageChannel, StatsSnapshot, Subscription};
pub use config::FabricConfig;
pub use fabric::Fabric;
