//! peerlink core: wire-level contracts shared by the helper process and its tooling.
//!
//! This crate defines the frame header codec, the RPC call/response envelopes,
//! the upcall event set, the value types crossing the process boundary
//! (`PeerId`, `Multiaddr`, `Verdict`) and the error surface. It carries no
//! transport or runtime dependencies.
//!
//! # Panic policy
//! `unwrap`/`expect`/`panic!` are denied in this crate. Fallible paths return
//! `PeerlinkError`; a malformed frame from the daemon is an error value.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;
pub mod types;

/// Shared result type.
pub use error::{ErrorCode, PeerlinkError, Result};
pub use types::{Multiaddr, PeerId, PeerInfo, Verdict};
