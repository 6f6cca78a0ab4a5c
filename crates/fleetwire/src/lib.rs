//! Top-level facade crate for fleetwire.
//!
//! Re-exports the core protocol types and the fabric runtime so users can
//! depend on a single crate.

pub mod core {
    pub use fleetwire_core::*;
}

pub mod fabric {
    pub use fleetwire_fabric::*;
}
