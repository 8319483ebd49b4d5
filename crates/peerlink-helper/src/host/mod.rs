//! Host capability: the seam between the RPC bridge and the transport library.
//!
//! The bridge only ever talks to a `Host`. Dialing, listening, stream
//! multiplexing and gossip propagation live behind it; the host reports
//! connection churn and inbound streams on a `HostEvent` channel and consults
//! an installed `ConnectionGater` on every dial and accept.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use peerlink_core::error::Result;
use peerlink_core::{Multiaddr, PeerId, PeerInfo, Verdict};

pub use memory::{MemoryHost, MemoryNetwork};

/// Which side initiated a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// One gossip message as seen by a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMessage {
    pub topic: String,
    /// Original publisher.
    pub from: PeerId,
    /// Publisher-local sequence number; `(from, seqno)` identifies the message.
    pub seqno: u64,
    pub data: Bytes,
}

impl GossipMessage {
    pub fn id(&self) -> (PeerId, u64) {
        (self.from.clone(), self.seqno)
    }
}

/// Per-topic hook consulted before a message is delivered or forwarded.
#[async_trait]
pub trait TopicValidator: Send + Sync {
    async fn validate(&self, msg: &GossipMessage) -> Verdict;
}

/// Admission control consulted by the host on the connection path.
pub trait ConnectionGater: Send + Sync {
    fn intercept_dial(&self, peer: Option<&PeerId>, addr: &Multiaddr) -> bool;
    fn intercept_accept(&self, peer: &PeerId, addr: &Multiaddr, open_conns: usize) -> bool;
}

/// Unit of traffic on a negotiated stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Data(Bytes),
    /// Graceful end of stream.
    Close,
    /// Abrupt termination.
    Reset,
}

/// A negotiated stream endpoint.
#[derive(Debug)]
pub struct StreamConn {
    pub peer: PeerId,
    pub protocol: String,
    pub tx: mpsc::Sender<StreamFrame>,
    pub rx: mpsc::Receiver<StreamFrame>,
}

/// Notifications produced by the host independently of any RPC.
#[derive(Debug)]
pub enum HostEvent {
    PeerConnected { peer: PeerId, direction: Direction },
    PeerDisconnected { peer: PeerId },
    /// Inbound stream on a protocol registered with `set_stream_handler`.
    IncomingStream(StreamConn),
}

/// Counters read by the metrics collector.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostStats {
    pub connected_peers: u64,
    pub inbound_connections: u64,
    pub outbound_connections: u64,
    pub topics: u64,
    pub messages_published: u64,
    pub messages_received: u64,
    pub streams_opened: u64,
}

#[async_trait]
pub trait Host: Send + Sync {
    fn local_id(&self) -> PeerId;

    fn listen_addrs(&self) -> Vec<Multiaddr>;

    /// Start listening on additional addresses; returns the full listen set.
    async fn listen(&self, addrs: Vec<Multiaddr>) -> Result<Vec<Multiaddr>>;

    /// Remember addresses for a peer so later dials by id can find it.
    fn add_addrs(&self, peer: &PeerId, addrs: Vec<Multiaddr>);

    /// Connect to `addr`; returns the remote's id. No-op if already connected.
    async fn dial(&self, addr: &Multiaddr) -> Result<PeerId>;

    async fn disconnect(&self, peer: &PeerId) -> Result<()>;

    fn connected_peers(&self) -> Vec<PeerInfo>;

    /// Connect if needed, then negotiate `protocol` on a fresh stream.
    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<StreamConn>;

    fn set_stream_handler(&self, protocol: &str);

    /// Returns false if no handler was registered for `protocol`.
    fn remove_stream_handler(&self, protocol: &str) -> bool;

    /// Join `topic`; accepted messages are delivered on `sink`.
    async fn join(
        &self,
        topic: &str,
        validator: Arc<dyn TopicValidator>,
        sink: mpsc::Sender<GossipMessage>,
    ) -> Result<()>;

    async fn leave(&self, topic: &str) -> Result<()>;

    /// Publish to `topic`. A local subscription is not required.
    async fn publish(&self, topic: &str, data: Bytes) -> Result<()>;

    fn set_gater(&self, gater: Arc<dyn ConnectionGater>);

    fn stats(&self) -> HostStats;

    async fn close(&self) -> Result<()>;
}
