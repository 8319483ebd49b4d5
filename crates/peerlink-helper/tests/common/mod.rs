//! Daemon-side harness: drives a helper over in-memory pipes.
#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};

use peerlink_core::protocol::frame::{decode_frame, FrameKind};
use peerlink_core::protocol::rpc::{encode_request, RpcResponse};
use peerlink_core::protocol::upcall::Upcall;
use peerlink_core::{Multiaddr, PeerId};
use peerlink_helper::app_state::AppState;
use peerlink_helper::config;
use peerlink_helper::host::{Host, HostEvent, MemoryHost, MemoryNetwork};
use peerlink_helper::transport::{read_frame, serve, write_frame};

pub const WAIT: Duration = Duration::from_secs(3);
const MAX_FRAME: usize = 1 << 20;

pub fn peer(n: u8) -> PeerId {
    PeerId::from_public_key(&[n; 32])
}

pub fn addr(s: &str) -> Multiaddr {
    s.parse().unwrap()
}

pub fn b64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// What the helper wrote, in channel order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    Response(u64),
    Upcall(&'static str),
}

pub struct Daemon {
    pub state: AppState,
    pub arrivals: Vec<Arrival>,
    pub host: Arc<MemoryHost>,
    tx: DuplexStream,
    rx: DuplexStream,
    next_seq: u64,
    responses: HashMap<u64, RpcResponse>,
    upcalls: VecDeque<Upcall>,
    _stop: oneshot::Sender<()>,
}

/// Start a helper with identity `peer(n)` from a YAML config body.
pub async fn spawn_helper(network: &MemoryNetwork, n: u8, yaml: &str) -> Daemon {
    let cfg = config::load_from_str(yaml).unwrap();
    let (ev_tx, ev_rx) = mpsc::channel(256);
    let host = Arc::new(MemoryHost::new(network, peer(n), ev_tx));

    let (state, queue) = AppState::new(cfg.clone(), host.clone()).unwrap();
    state.spawn_host_events(ev_rx);
    host.listen(cfg.helper.listen_addrs.clone()).await.unwrap();
    state.spawn_metrics();

    let (daemon_w, helper_r) = tokio::io::duplex(1 << 16);
    let (helper_w, daemon_r) = tokio::io::duplex(1 << 16);
    tokio::spawn(serve(state.clone(), helper_r));
    let (stop, stop_rx) = oneshot::channel();
    tokio::spawn(queue.run(helper_w, stop_rx));

    Daemon {
        state,
        arrivals: Vec::new(),
        host,
        tx: daemon_w,
        rx: daemon_r,
        next_seq: 1,
        responses: HashMap::new(),
        upcalls: VecDeque::new(),
        _stop: stop,
    }
}

/// A bare host with no helper in front of it.
pub async fn remote(network: &MemoryNetwork, n: u8, listen: &str) -> (MemoryHost, mpsc::Receiver<HostEvent>) {
    let (tx, rx) = mpsc::channel(256);
    let h = MemoryHost::new(network, peer(n), tx);
    h.listen(vec![addr(listen)]).await.unwrap();
    (h, rx)
}

impl Daemon {
    pub fn peer_id(&self) -> PeerId {
        self.host.local_id()
    }

    pub fn addr(&self) -> Multiaddr {
        self.host.listen_addrs()[0].clone().with_peer(self.peer_id())
    }

    pub async fn send(&mut self, method: &str, data: Value) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let body = encode_request(seq, method, &data).unwrap();
        self.send_raw(&body).await;
        seq
    }

    pub async fn send_raw(&mut self, body: &[u8]) {
        write_frame(&mut self.tx, body).await.unwrap();
    }

    pub async fn response(&mut self, seq: u64) -> RpcResponse {
        loop {
            if let Some(r) = self.responses.remove(&seq) {
                return r;
            }
            assert!(self.pump(WAIT).await, "timed out waiting for response {seq}");
        }
    }

    pub async fn call(&mut self, method: &str, data: Value) -> RpcResponse {
        let seq = self.send(method, data).await;
        let resp = self.response(seq).await;
        assert_eq!(resp.seq, seq);
        resp
    }

    pub async fn ok(&mut self, method: &str, data: Value) -> Value {
        match self.call(method, data).await.outcome {
            Ok(v) => v,
            Err(cause) => panic!("{method} failed: {cause}"),
        }
    }

    pub async fn err(&mut self, method: &str, data: Value) -> String {
        match self.call(method, data).await.outcome {
            Ok(v) => panic!("{method} unexpectedly succeeded: {v}"),
            Err(cause) => cause,
        }
    }

    /// Wait for the first buffered or incoming upcall matching `pred`.
    pub async fn upcall_where(&mut self, pred: impl Fn(&Upcall) -> bool) -> Upcall {
        loop {
            if let Some(i) = self.upcalls.iter().position(&pred) {
                return self.upcalls.remove(i).unwrap();
            }
            assert!(self.pump(WAIT).await, "timed out waiting for upcall");
        }
    }

    /// True if nothing matching `pred` shows up within `wait`.
    pub async fn quiet_for(&mut self, wait: Duration, pred: impl Fn(&Upcall) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.upcalls.iter().any(&pred) {
                return false;
            }
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() || !self.pump(left).await {
                return !self.upcalls.iter().any(&pred);
            }
        }
    }

    /// Read one frame; false on timeout.
    async fn pump(&mut self, wait: Duration) -> bool {
        let body = match tokio::time::timeout(wait, read_frame(&mut self.rx, MAX_FRAME)).await {
            Err(_) => return false,
            Ok(r) => r.unwrap().expect("helper closed the channel"),
        };
        let frame = decode_frame(body).unwrap();
        match frame.kind {
            FrameKind::Response => {
                let r = RpcResponse::from_frame(&frame).unwrap();
                let seq = r.seq;
                self.arrivals.push(Arrival::Response(seq));
                assert!(self.responses.insert(seq, r).is_none(), "second response for seq {seq}");
            }
            FrameKind::Upcall => {
                let u = Upcall::decode(&frame.payload).unwrap();
                self.arrivals.push(Arrival::Upcall(u.name()));
                self.upcalls.push_back(u);
            }
            FrameKind::Request => panic!("helper sent a request frame"),
        }
        true
    }
}
