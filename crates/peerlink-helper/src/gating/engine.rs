use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::rpc::GatingConfigReq;
use peerlink_core::{Multiaddr, PeerId};

use crate::config::HelperConfig;
use crate::host::{ConnectionGater, Direction};
use crate::obs::metrics::HelperMetrics;

use super::filters::{any_match, compile_filters, AddrFilter};

/// Decision from gating evaluation, with the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow(&'static str),
    Deny(&'static str),
}

impl GateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, GateDecision::Allow(_))
    }

    pub fn reason(self) -> &'static str {
        match self {
            GateDecision::Allow(r) | GateDecision::Deny(r) => r,
        }
    }
}

/// Admission-control inputs. Replaced as a whole; never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct GatingState {
    pub trusted_peers: HashSet<PeerId>,
    pub trusted_addrs: Vec<AddrFilter>,
    pub banned_peers: HashSet<PeerId>,
    pub banned_addrs: Vec<AddrFilter>,
    pub seeds: HashSet<PeerId>,
    pub max_connections: usize,
    pub isolate: bool,
}

impl GatingState {
    pub fn from_config(cfg: &HelperConfig) -> Result<Self> {
        Ok(Self {
            trusted_peers: cfg.gating.trusted_peers.iter().cloned().collect(),
            trusted_addrs: compile_filters(&cfg.gating.trusted_addrs)?,
            banned_peers: cfg.gating.banned_peers.iter().cloned().collect(),
            banned_addrs: compile_filters(&cfg.gating.banned_addrs)?,
            seeds: cfg.seeds.iter().filter_map(|s| s.peer_id().cloned()).collect(),
            max_connections: cfg.helper.max_connections,
            isolate: cfg.gating.isolate,
        })
    }

    pub fn is_banned(&self, peer: Option<&PeerId>, addr: Option<&Multiaddr>) -> bool {
        peer.is_some_and(|p| self.banned_peers.contains(p))
            || addr.is_some_and(|a| any_match(&self.banned_addrs, a.ip()))
    }

    fn is_trusted(&self, peer: Option<&PeerId>, addr: &Multiaddr) -> bool {
        peer.is_some_and(|p| self.trusted_peers.contains(p)) || any_match(&self.trusted_addrs, addr.ip())
    }

    /// Ban beats trust; trust and seeds beat isolation and capacity.
    pub fn decide(
        &self,
        direction: Direction,
        peer: Option<&PeerId>,
        addr: &Multiaddr,
        open_conns: usize,
    ) -> GateDecision {
        let peer = peer.or(addr.peer_id());

        if self.is_banned(peer, Some(addr)) {
            return GateDecision::Deny("banned");
        }
        if self.is_trusted(peer, addr) {
            return GateDecision::Allow("trusted");
        }
        if peer.is_some_and(|p| self.seeds.contains(p)) {
            return GateDecision::Allow("seed");
        }
        if self.isolate {
            return GateDecision::Deny("isolated");
        }
        if direction == Direction::Inbound && open_conns >= self.max_connections {
            return GateDecision::Deny("at capacity");
        }
        GateDecision::Allow("default")
    }
}

/// Shared gating runtime: lock-free snapshot reads, serialized writers.
pub struct GatingEvaluator {
    state: ArcSwap<GatingState>,
    writer: Mutex<()>,
    metrics: Arc<HelperMetrics>,
}

impl GatingEvaluator {
    pub fn new(state: GatingState, metrics: Arc<HelperMetrics>) -> Self {
        Self {
            state: ArcSwap::from_pointee(state),
            writer: Mutex::new(()),
            metrics,
        }
    }

    pub fn snapshot(&self) -> Arc<GatingState> {
        self.state.load_full()
    }

    /// Copy-on-write update; readers see either the old or the new state.
    pub fn update<F>(&self, f: F) -> Result<Arc<GatingState>>
    where
        F: FnOnce(&mut GatingState) -> Result<()>,
    {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| PeerlinkError::Internal("gating writer lock poisoned".into()))?;
        let mut next = GatingState::clone(&self.state.load());
        f(&mut next)?;
        let next = Arc::new(next);
        self.state.store(Arc::clone(&next));
        Ok(next)
    }

    /// Replace ban/trust lists and the isolate flag. Seeds and capacity stay.
    pub fn replace(&self, req: &GatingConfigReq) -> Result<Arc<GatingState>> {
        let trusted_addrs = compile_filters(&req.trusted_addrs)?;
        let banned_addrs = compile_filters(&req.banned_addrs)?;
        self.update(|s| {
            s.trusted_peers = req.trusted_peers.iter().cloned().collect();
            s.trusted_addrs = trusted_addrs;
            s.banned_peers = req.banned_peers.iter().cloned().collect();
            s.banned_addrs = banned_addrs;
            s.isolate = req.isolate;
            Ok(())
        })
    }

    pub fn check(
        &self,
        direction: Direction,
        peer: Option<&PeerId>,
        addr: &Multiaddr,
        open_conns: usize,
    ) -> GateDecision {
        let decision = self.state.load().decide(direction, peer, addr, open_conns);

        let outcome = if decision.is_allowed() { "allow" } else { "deny" };
        self.metrics.gating_decisions.inc(&[
            ("direction", direction.as_str()),
            ("outcome", outcome),
            ("reason", decision.reason()),
        ]);
        if !decision.is_allowed() {
            tracing::debug!(direction = direction.as_str(), %addr, reason = decision.reason(), "connection gated");
        }
        decision
    }
}

impl ConnectionGater for GatingEvaluator {
    fn intercept_dial(&self, peer: Option<&PeerId>, addr: &Multiaddr) -> bool {
        self.check(Direction::Outbound, peer, addr, 0).is_allowed()
    }

    fn intercept_accept(&self, peer: &PeerId, addr: &Multiaddr, open_conns: usize) -> bool {
        self.check(Direction::Inbound, Some(peer), addr, open_conns).is_allowed()
    }
}
