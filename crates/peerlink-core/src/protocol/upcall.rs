//! Asynchronous events pushed to the daemon.
//!
//! Upcalls answer no request and carry no sequence number. Binary data is
//! base64 inside the JSON payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{PeerlinkError, Result};
use crate::protocol::frame::Frame;
use crate::types::{b64, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Upcall {
    /// An accepted gossip message delivered to a local subscription.
    GossipReceived {
        subscription_id: u64,
        topic: String,
        sender: PeerId,
        #[serde(with = "b64")]
        data: Bytes,
    },
    /// A gossip message awaiting a `validation_result` call.
    ValidationNeeded {
        validation_id: u64,
        subscription_id: u64,
        topic: String,
        sender: PeerId,
        #[serde(with = "b64")]
        data: Bytes,
    },
    IncomingStream {
        stream_id: u64,
        peer: PeerId,
        protocol: String,
    },
    StreamData {
        stream_id: u64,
        #[serde(with = "b64")]
        data: Bytes,
    },
    /// Remote closed the stream gracefully.
    StreamClosed { stream_id: u64 },
    /// Remote reset the stream or the connection was lost.
    StreamReset { stream_id: u64 },
    PeerConnected { peer_id: PeerId },
    PeerDisconnected { peer_id: PeerId },
}

impl Upcall {
    /// Wire name, also used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            Upcall::GossipReceived { .. } => "gossip_received",
            Upcall::ValidationNeeded { .. } => "validation_needed",
            Upcall::IncomingStream { .. } => "incoming_stream",
            Upcall::StreamData { .. } => "stream_data",
            Upcall::StreamClosed { .. } => "stream_closed",
            Upcall::StreamReset { .. } => "stream_reset",
            Upcall::PeerConnected { .. } => "peer_connected",
            Upcall::PeerDisconnected { .. } => "peer_disconnected",
        }
    }

    /// Frame body for the outbound channel.
    pub fn encode(&self) -> Result<Bytes> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| PeerlinkError::Internal(format!("upcall encode failed: {e}")))?;
        Ok(Frame::upcall(Bytes::from(payload)).encode())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| PeerlinkError::BadRequest(format!("invalid upcall: {e}")))
    }
}
