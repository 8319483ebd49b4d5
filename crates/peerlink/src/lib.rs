//! Top-level facade crate for peerlink.
//!
//! Re-exports the wire contracts and the helper library so users can depend on a single crate.

pub mod core {
    pub use peerlink_core::*;
}

pub mod helper {
    pub use peerlink_helper::*;
}
