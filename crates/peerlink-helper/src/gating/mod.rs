//! Gating layer (connection admission control).
//!
//! Compiles ban/trust configuration into snapshot structures that the host
//! consults on every dial and inbound accept.

pub mod engine;
pub mod filters;

pub use engine::{GateDecision, GatingEvaluator, GatingState};
pub use filters::AddrFilter;
