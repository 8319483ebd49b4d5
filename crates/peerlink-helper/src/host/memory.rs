//! In-process host: every `MemoryHost` on one `MemoryNetwork` can reach the others.
//!
//! Connections, streams and gossip are simulated with tokio channels. Gossip is
//! flooded to connected peers that joined the topic; a node forwards a message
//! only after its own validator accepted it.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::{Multiaddr, PeerId, PeerInfo, Verdict};

use super::{
    ConnectionGater, Direction, GossipMessage, Host, HostEvent, HostStats, StreamConn, StreamFrame,
    TopicValidator,
};

const STREAM_BUFFER: usize = 256;
const SEEN_CAP: usize = 65_536;
const EPHEMERAL_PORT_BASE: u16 = 40_000;

/// Shared address space for memory hosts.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    listeners: DashMap<(IpAddr, u16), Weak<HostInner>>,
    next_port: AtomicU16,
    /// Held while both ends of a link are added or removed.
    link_lock: Mutex<()>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, addr: &Multiaddr) -> Option<Arc<HostInner>> {
        self.inner
            .listeners
            .get(&(addr.ip(), addr.port()))
            .and_then(|w| w.upgrade())
    }

    fn bind(&self, addr: &Multiaddr, host: &Arc<HostInner>) -> Result<Multiaddr> {
        let port = if addr.port() == 0 {
            EPHEMERAL_PORT_BASE.wrapping_add(self.inner.next_port.fetch_add(1, Ordering::Relaxed))
        } else {
            addr.port()
        };
        match self.inner.listeners.entry((addr.ip(), port)) {
            Entry::Occupied(mut e) => {
                if e.get().upgrade().is_some() {
                    return Err(PeerlinkError::Host(format!("address in use: {addr}")));
                }
                e.insert(Arc::downgrade(host));
            }
            Entry::Vacant(e) => {
                e.insert(Arc::downgrade(host));
            }
        }
        Ok(Multiaddr::new(addr.ip(), port))
    }

    fn link_guard(&self) -> MutexGuard<'_, ()> {
        self.inner.link_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unbind(&self, addr: &Multiaddr) {
        self.inner.listeners.remove(&(addr.ip(), addr.port()));
    }
}

struct Link {
    direction: Direction,
    remote_addr: Multiaddr,
    remote: Weak<HostInner>,
}

struct Joined {
    validator: Arc<dyn TopicValidator>,
    sink: mpsc::Sender<GossipMessage>,
}

struct HostInner {
    id: PeerId,
    network: MemoryNetwork,
    listen: RwLock<Vec<Multiaddr>>,
    links: DashMap<PeerId, Link>,
    peerstore: DashMap<PeerId, Vec<Multiaddr>>,
    handlers: DashSet<String>,
    topics: DashMap<String, Joined>,
    seen: DashSet<(PeerId, u64)>,
    /// Senders feeding this host's stream endpoints, per remote peer.
    stream_feeds: DashMap<PeerId, Vec<mpsc::Sender<StreamFrame>>>,
    gater: RwLock<Option<Arc<dyn ConnectionGater>>>,
    events: mpsc::Sender<HostEvent>,
    seqno: AtomicU64,
    published: AtomicU64,
    received: AtomicU64,
    streams_opened: AtomicU64,
    closed: AtomicBool,
}

impl HostInner {
    fn gater(&self) -> Option<Arc<dyn ConnectionGater>> {
        self.gater.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn source_addr(&self) -> Multiaddr {
        let listen = self.listen.read().unwrap_or_else(|e| e.into_inner());
        listen
            .first()
            .cloned()
            .unwrap_or_else(|| Multiaddr::new(Ipv4Addr::LOCALHOST.into(), 0))
            .with_peer(self.id.clone())
    }

    async fn notify(&self, ev: HostEvent) {
        if self.events.send(ev).await.is_err() {
            tracing::debug!(peer = %self.id, "host event receiver dropped");
        }
    }

    fn add_addrs(&self, peer: &PeerId, addrs: Vec<Multiaddr>) {
        let mut known = self.peerstore.entry(peer.clone()).or_default();
        for a in addrs {
            let a = a.transport();
            if !known.contains(&a) {
                known.push(a);
            }
        }
    }

    async fn dial(self: &Arc<Self>, addr: &Multiaddr) -> Result<PeerId> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(PeerlinkError::Host("host closed".into()));
        }
        let remote = self
            .network
            .lookup(addr)
            .filter(|r| !r.closed.load(Ordering::Relaxed))
            .ok_or_else(|| PeerlinkError::Host(format!("connection refused: {addr}")))?;
        if let Some(expected) = addr.peer_id() {
            if *expected != remote.id {
                return Err(PeerlinkError::Host(format!("peer id mismatch at {addr}")));
            }
        }
        if remote.id == self.id {
            return Err(PeerlinkError::BadRequest("cannot dial self".into()));
        }
        if self.links.contains_key(&remote.id) {
            return Ok(remote.id.clone());
        }

        if let Some(g) = self.gater() {
            if !g.intercept_dial(Some(&remote.id), addr) {
                return Err(PeerlinkError::Gated(format!("dial to {addr} denied")));
            }
        }
        let source = self.source_addr();
        if let Some(g) = remote.gater() {
            if !g.intercept_accept(&self.id, &source, remote.links.len()) {
                return Err(PeerlinkError::Gated(format!("{} refused the connection", remote.id)));
            }
        }

        {
            let _guard = self.network.link_guard();
            let Entry::Vacant(ours) = self.links.entry(remote.id.clone()) else {
                return Ok(remote.id.clone());
            };
            let Entry::Vacant(theirs) = remote.links.entry(self.id.clone()) else {
                return Ok(remote.id.clone());
            };
            ours.insert(Link {
                direction: Direction::Outbound,
                remote_addr: addr.transport(),
                remote: Arc::downgrade(&remote),
            });
            theirs.insert(Link {
                direction: Direction::Inbound,
                remote_addr: source.transport(),
                remote: Arc::downgrade(self),
            });
        }
        self.add_addrs(&remote.id, vec![addr.clone()]);

        tracing::debug!(local = %self.id, remote = %remote.id, %addr, "connected");
        self.notify(HostEvent::PeerConnected { peer: remote.id.clone(), direction: Direction::Outbound }).await;
        remote.notify(HostEvent::PeerConnected { peer: self.id.clone(), direction: Direction::Inbound }).await;

        Ok(remote.id.clone())
    }

    async fn disconnect(self: &Arc<Self>, peer: &PeerId) -> Result<()> {
        let (remote, remote_linked) = {
            let _guard = self.network.link_guard();
            let Some((_, link)) = self.links.remove(peer) else {
                return Err(PeerlinkError::NotFound(format!("no connection to {peer}")));
            };
            let remote = link.remote.upgrade();
            let remote_linked = remote.as_ref().is_some_and(|r| r.links.remove(&self.id).is_some());
            (remote, remote_linked)
        };
        self.reset_streams(peer);
        self.notify(HostEvent::PeerDisconnected { peer: peer.clone() }).await;

        if let (Some(remote), true) = (remote, remote_linked) {
            remote.reset_streams(&self.id);
            remote.notify(HostEvent::PeerDisconnected { peer: self.id.clone() }).await;
        }
        tracing::debug!(local = %self.id, remote = %peer, "disconnected");
        Ok(())
    }

    fn track_stream(&self, peer: &PeerId, tx: mpsc::Sender<StreamFrame>) {
        let mut feeds = self.stream_feeds.entry(peer.clone()).or_default();
        feeds.retain(|t| !t.is_closed());
        feeds.push(tx);
    }

    fn reset_streams(&self, peer: &PeerId) {
        if let Some((_, feeds)) = self.stream_feeds.remove(peer) {
            for tx in feeds {
                let _ = tx.try_send(StreamFrame::Reset);
            }
        }
    }

    async fn open_stream(self: &Arc<Self>, peer: &PeerId, protocol: &str) -> Result<StreamConn> {
        if !self.links.contains_key(peer) {
            let addrs = self.peerstore.get(peer).map(|a| a.clone()).unwrap_or_default();
            if addrs.is_empty() {
                return Err(PeerlinkError::Host(format!("no known address for {peer}")));
            }
            let mut last_err = None;
            for a in addrs {
                match self.dial(&a).await {
                    Ok(_) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        let remote = self
            .links
            .get(peer)
            .and_then(|l| l.remote.upgrade())
            .ok_or_else(|| PeerlinkError::Host(format!("not connected to {peer}")))?;
        if !remote.handlers.contains(protocol) {
            return Err(PeerlinkError::Host(format!("protocol not supported: {protocol}")));
        }

        let (to_remote, remote_rx) = mpsc::channel(STREAM_BUFFER);
        let (to_local, local_rx) = mpsc::channel(STREAM_BUFFER);
        self.track_stream(peer, to_local.clone());
        remote.track_stream(&self.id, to_remote.clone());

        let inbound = StreamConn {
            peer: self.id.clone(),
            protocol: protocol.to_string(),
            tx: to_local,
            rx: remote_rx,
        };
        remote
            .events
            .send(HostEvent::IncomingStream(inbound))
            .await
            .map_err(|_| PeerlinkError::Host(format!("{peer} stopped accepting streams")))?;

        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        remote.streams_opened.fetch_add(1, Ordering::Relaxed);

        Ok(StreamConn {
            peer: peer.clone(),
            protocol: protocol.to_string(),
            tx: to_remote,
            rx: local_rx,
        })
    }

    /// Returns false if the message was already seen.
    fn mark_seen(&self, msg: &GossipMessage) -> bool {
        if self.seen.len() >= SEEN_CAP {
            self.seen.clear();
        }
        self.seen.insert(msg.id())
    }

    fn publish(self: &Arc<Self>, topic: &str, data: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(PeerlinkError::Host("host closed".into()));
        }
        let msg = GossipMessage {
            topic: topic.to_string(),
            from: self.id.clone(),
            seqno: self.seqno.fetch_add(1, Ordering::Relaxed),
            data,
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        self.mark_seen(&msg);

        if self.topics.contains_key(topic) {
            let me = Arc::clone(self);
            let local = msg.clone();
            tokio::spawn(async move { me.deliver(local, None).await });
        }
        self.forward(&msg, None);
        Ok(())
    }

    fn forward(&self, msg: &GossipMessage, except: Option<&PeerId>) {
        let targets: Vec<Arc<HostInner>> = self
            .links
            .iter()
            .filter(|l| Some(l.key()) != except && *l.key() != msg.from)
            .filter_map(|l| l.value().remote.upgrade())
            .collect();
        for remote in targets {
            tokio::spawn(remote.receive(msg.clone(), self.id.clone()));
        }
    }

    fn receive(self: Arc<Self>, msg: GossipMessage, via: PeerId) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.closed.load(Ordering::Relaxed) || !self.topics.contains_key(&msg.topic) {
                return;
            }
            if !self.mark_seen(&msg) {
                return;
            }
            self.received.fetch_add(1, Ordering::Relaxed);
            self.deliver(msg, Some(via)).await;
        })
    }

    async fn deliver(&self, msg: GossipMessage, via: Option<PeerId>) {
        let joined = self
            .topics
            .get(&msg.topic)
            .map(|j| (Arc::clone(&j.validator), j.sink.clone()));
        let Some((validator, sink)) = joined else { return };

        match validator.validate(&msg).await {
            Verdict::Accept => {
                if sink.send(msg.clone()).await.is_err() {
                    tracing::debug!(topic = %msg.topic, "subscription sink closed");
                }
                if let Some(via) = via {
                    self.forward(&msg, Some(&via));
                }
            }
            verdict => {
                tracing::debug!(topic = %msg.topic, from = %msg.from, ?verdict, "gossip message not propagated");
            }
        }
    }
}

/// Host handle backed by a `MemoryNetwork`.
#[derive(Clone)]
pub struct MemoryHost {
    inner: Arc<HostInner>,
}

impl MemoryHost {
    pub fn new(network: &MemoryNetwork, id: PeerId, events: mpsc::Sender<HostEvent>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                id,
                network: network.clone(),
                listen: RwLock::new(Vec::new()),
                links: DashMap::new(),
                peerstore: DashMap::new(),
                handlers: DashSet::new(),
                topics: DashMap::new(),
                seen: DashSet::new(),
                stream_feeds: DashMap::new(),
                gater: RwLock::new(None),
                events,
                seqno: AtomicU64::new(1),
                published: AtomicU64::new(0),
                received: AtomicU64::new(0),
                streams_opened: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Host for MemoryHost {
    fn local_id(&self) -> PeerId {
        self.inner.id.clone()
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.inner.listen.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn listen(&self, addrs: Vec<Multiaddr>) -> Result<Vec<Multiaddr>> {
        for a in addrs {
            let bound = self.inner.network.bind(&a, &self.inner)?;
            tracing::info!(peer = %self.inner.id, addr = %bound, "listening");
            self.inner
                .listen
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push(bound);
        }
        Ok(self.listen_addrs())
    }

    fn add_addrs(&self, peer: &PeerId, addrs: Vec<Multiaddr>) {
        self.inner.add_addrs(peer, addrs);
    }

    async fn dial(&self, addr: &Multiaddr) -> Result<PeerId> {
        self.inner.dial(addr).await
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.inner.disconnect(peer).await
    }

    fn connected_peers(&self) -> Vec<PeerInfo> {
        self.inner
            .links
            .iter()
            .map(|l| PeerInfo {
                peer_id: l.key().clone(),
                addrs: vec![l.value().remote_addr.clone()],
            })
            .collect()
    }

    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<StreamConn> {
        self.inner.open_stream(peer, protocol).await
    }

    fn set_stream_handler(&self, protocol: &str) {
        self.inner.handlers.insert(protocol.to_string());
    }

    fn remove_stream_handler(&self, protocol: &str) -> bool {
        self.inner.handlers.remove(protocol).is_some()
    }

    async fn join(
        &self,
        topic: &str,
        validator: Arc<dyn TopicValidator>,
        sink: mpsc::Sender<GossipMessage>,
    ) -> Result<()> {
        match self.inner.topics.entry(topic.to_string()) {
            Entry::Occupied(_) => Err(PeerlinkError::AlreadyExists(format!("topic {topic} already joined"))),
            Entry::Vacant(v) => {
                v.insert(Joined { validator, sink });
                Ok(())
            }
        }
    }

    async fn leave(&self, topic: &str) -> Result<()> {
        self.inner
            .topics
            .remove(topic)
            .map(|_| ())
            .ok_or_else(|| PeerlinkError::NotFound(format!("topic {topic} not joined")))
    }

    async fn publish(&self, topic: &str, data: Bytes) -> Result<()> {
        self.inner.publish(topic, data)
    }

    fn set_gater(&self, gater: Arc<dyn ConnectionGater>) {
        *self.inner.gater.write().unwrap_or_else(|e| e.into_inner()) = Some(gater);
    }

    fn stats(&self) -> HostStats {
        let inbound = self
            .inner
            .links
            .iter()
            .filter(|l| l.value().direction == Direction::Inbound)
            .count() as u64;
        let connected = self.inner.links.len() as u64;
        HostStats {
            connected_peers: connected,
            inbound_connections: inbound,
            outbound_connections: connected.saturating_sub(inbound),
            topics: self.inner.topics.len() as u64,
            messages_published: self.inner.published.load(Ordering::Relaxed),
            messages_received: self.inner.received.load(Ordering::Relaxed),
            streams_opened: self.inner.streams_opened.load(Ordering::Relaxed),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let peers: Vec<PeerId> = self.inner.links.iter().map(|l| l.key().clone()).collect();
        for p in peers {
            let _ = self.inner.disconnect(&p).await;
        }
        for a in self.listen_addrs() {
            self.inner.network.unbind(&a);
        }
        self.inner.topics.clear();
        self.inner.handlers.clear();
        tracing::info!(peer = %self.inner.id, "host closed");
        Ok(())
    }
}
