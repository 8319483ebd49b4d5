//! RPC call envelope (JSON) and correlated responses.
//!
//! The envelope keeps `data` as `RawValue` so that the method name can be
//! resolved before any method-specific parsing happens. An unknown method is
//! a per-call error, not a stream decode failure.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::{PeerlinkError, Result};
use crate::protocol::frame::{Frame, FrameKind};
use crate::types::{b64, Multiaddr, PeerId, PeerInfo, Verdict};

/// Closed set of methods understood by this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Subscribe,
    Unsubscribe,
    Publish,
    ValidationResult,
    AddStreamHandler,
    RemoveStreamHandler,
    OpenStream,
    SendStream,
    CloseStream,
    ResetStream,
    Listen,
    GetListeningAddrs,
    Identity,
    AddPeer,
    ListPeers,
    SetGatingConfig,
    BanPeer,
    UnbanPeer,
    GetMetrics,
    GenerateKeypair,
}

impl Method {
    pub const ALL: [Method; 20] = [
        Method::Subscribe,
        Method::Unsubscribe,
        Method::Publish,
        Method::ValidationResult,
        Method::AddStreamHandler,
        Method::RemoveStreamHandler,
        Method::OpenStream,
        Method::SendStream,
        Method::CloseStream,
        Method::ResetStream,
        Method::Listen,
        Method::GetListeningAddrs,
        Method::Identity,
        Method::AddPeer,
        Method::ListPeers,
        Method::SetGatingConfig,
        Method::BanPeer,
        Method::UnbanPeer,
        Method::GetMetrics,
        Method::GenerateKeypair,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Subscribe => "subscribe",
            Method::Unsubscribe => "unsubscribe",
            Method::Publish => "publish",
            Method::ValidationResult => "validation_result",
            Method::AddStreamHandler => "add_stream_handler",
            Method::RemoveStreamHandler => "remove_stream_handler",
            Method::OpenStream => "open_stream",
            Method::SendStream => "send_stream",
            Method::CloseStream => "close_stream",
            Method::ResetStream => "reset_stream",
            Method::Listen => "listen",
            Method::GetListeningAddrs => "get_listening_addrs",
            Method::Identity => "identity",
            Method::AddPeer => "add_peer",
            Method::ListPeers => "list_peers",
            Method::SetGatingConfig => "set_gating_config",
            Method::BanPeer => "ban_peer",
            Method::UnbanPeer => "unban_peer",
            Method::GetMetrics => "get_metrics",
            Method::GenerateKeypair => "generate_keypair",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == s)
    }

    /// Ordered methods mutate state that a later request from the same
    /// stream may depend on; the reader completes them before reading on.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            Method::Subscribe
                | Method::Unsubscribe
                | Method::ValidationResult
                | Method::AddStreamHandler
                | Method::RemoveStreamHandler
                | Method::SendStream
                | Method::CloseStream
                | Method::ResetStream
                | Method::SetGatingConfig
                | Method::BanPeer
                | Method::UnbanPeer
        )
    }
}

/// Request envelope (payload of a `Request` frame).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcCall {
    /// Method name; resolved with [`Method::parse`].
    pub method: String,
    /// Optional arguments, stored as raw JSON (lazy parsing).
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl RpcCall {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| PeerlinkError::BadRequest(format!("invalid call envelope: {e}")))
    }

    pub fn method(&self) -> Result<Method> {
        Method::parse(&self.method).ok_or_else(|| PeerlinkError::UnknownMethod(self.method.clone()))
    }

    /// Parse `data` into the method's argument type. Absent `data` parses as `{}`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.data.as_deref().map(RawValue::get).unwrap_or("{}");
        serde_json::from_str(raw)
            .map_err(|e| PeerlinkError::BadRequest(format!("{} invalid data: {e}", self.method)))
    }
}

/// Build a request frame body (daemon side / tooling).
pub fn encode_request<T: Serialize>(seq: u64, method: &str, data: &T) -> Result<Bytes> {
    let payload = serde_json::to_vec(&serde_json::json!({ "method": method, "data": data }))
        .map_err(|e| PeerlinkError::Internal(format!("request encode failed: {e}")))?;
    Ok(Frame::request(seq, Bytes::from(payload)).encode())
}

/// Single response to one request, correlated by `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub seq: u64,
    pub outcome: std::result::Result<Value, String>,
}

impl RpcResponse {
    pub fn success(seq: u64, value: Value) -> Self {
        Self { seq, outcome: Ok(value) }
    }

    pub fn error(seq: u64, cause: impl Into<String>) -> Self {
        Self { seq, outcome: Err(cause.into()) }
    }

    /// Frame body for the outbound channel.
    pub fn encode(&self) -> Result<Bytes> {
        match &self.outcome {
            Ok(v) => {
                let payload = serde_json::to_vec(v)
                    .map_err(|e| PeerlinkError::Internal(format!("response encode failed: {e}")))?;
                Ok(Frame::response(self.seq, false, Bytes::from(payload)).encode())
            }
            Err(cause) => Ok(Frame::response(self.seq, true, Bytes::from(cause.clone().into_bytes())).encode()),
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.kind != FrameKind::Response {
            return Err(PeerlinkError::BadRequest("not a response frame".into()));
        }
        let seq = frame
            .seq
            .ok_or_else(|| PeerlinkError::BadRequest("response without seq".into()))?;
        if frame.is_error() {
            let cause = String::from_utf8_lossy(&frame.payload).into_owned();
            return Ok(Self::error(seq, cause));
        }
        let v = serde_json::from_slice(&frame.payload)
            .map_err(|e| PeerlinkError::BadRequest(format!("invalid success payload: {e}")))?;
        Ok(Self::success(seq, v))
    }
}

// --------------------
// Per-method payloads
// --------------------

/// Arguments or result with no fields.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeReq {
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResp {
    pub subscription_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeReq {
    pub subscription_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReq {
    pub topic: String,
    #[serde(with = "b64")]
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResultReq {
    pub validation_id: u64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHandlerReq {
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStreamReq {
    /// Peer id, or a multiaddr with a `/p2p/` component to dial first.
    pub peer: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStreamResp {
    pub stream_id: u64,
    pub peer: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendStreamReq {
    pub stream_id: u64,
    #[serde(with = "b64")]
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamIdReq {
    pub stream_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenReq {
    pub addrs: Vec<Multiaddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrsResp {
    pub addrs: Vec<Multiaddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResp {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerReq {
    /// Must carry a `/p2p/` component.
    pub addr: Multiaddr,
    #[serde(default)]
    pub seed: bool,
    #[serde(default)]
    pub trusted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerResp {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPeersResp {
    pub peers: Vec<PeerInfo>,
}

/// Full replacement of the ban/trust lists.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GatingConfigReq {
    #[serde(default)]
    pub banned_peers: Vec<PeerId>,
    /// IPs or CIDR blocks.
    #[serde(default)]
    pub banned_addrs: Vec<String>,
    #[serde(default)]
    pub trusted_peers: Vec<PeerId>,
    #[serde(default)]
    pub trusted_addrs: Vec<String>,
    #[serde(default)]
    pub isolate: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BanReq {
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    /// IP or CIDR block.
    #[serde(default)]
    pub addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypairResp {
    pub secret_key: String,
    pub public_key: String,
    pub peer_id: PeerId,
}

/// Cached host statistics served by `get_metrics`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Number of completed collection ticks; 0 before the first one.
    pub ticks: u64,
    /// Unix millis of the last collection, 0 before the first one.
    pub collected_at_ms: u64,
    pub connected_peers: u64,
    pub inbound_connections: u64,
    pub outbound_connections: u64,
    pub topics: u64,
    pub messages_published: u64,
    pub messages_received: u64,
    pub streams_opened: u64,
    pub subscriptions: u64,
    pub pending_validations: u64,
    pub open_streams: u64,
}
