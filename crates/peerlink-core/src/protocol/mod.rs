//! Protocol modules.
//!
//! - `frame`: binary header with outer tag and optional sequence number.
//! - `rpc`: JSON call envelope with lazily parsed `data`, typed per-method
//!   payloads, and the correlated response.
//! - `upcall`: asynchronous events pushed to the daemon.
//!
//! All parsers are panic-free: malformed input is reported as `PeerlinkError`.

pub mod frame;
pub mod rpc;
pub mod upcall;
