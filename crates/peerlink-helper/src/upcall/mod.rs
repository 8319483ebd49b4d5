//! Outbound side of the byte channel: one bounded queue, one writer.

pub mod emitter;

pub use emitter::{OutboundQueue, UpcallEmitter};
