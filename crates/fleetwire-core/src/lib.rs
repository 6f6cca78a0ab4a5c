//! Fleetwire core: transport-agnostic envelope, wire codec, and error surface.
//!
//! This crate defines the wire-level contracts shared by the fabric runtime,
//! adapter implementations, and tooling. It intentionally carries no transport
//! or runtime dependencies so it can be reused in multiple contexts.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `FleetwireError`/`Result` so node
//! processes do not crash on malformed frames from a peer.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod envelope;
pub mod error;
pub mod node;
pub mod wire;

pub use envelope::Envelope;
pub use error::{ErrorCode, FleetwireError, Result};
pub use node::{NodeId, SessionId};
