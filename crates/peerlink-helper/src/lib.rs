//! peerlink helper library entry.
//!
//! Wires the host capability, gating, registries, dispatcher, services and
//! the upcall emitter into the helper process. Consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod gating;
pub mod host;
pub mod identity;
pub mod obs;
pub mod ops;
pub mod registry;
pub mod router;
pub mod services;
pub mod transport;
pub mod upcall;
