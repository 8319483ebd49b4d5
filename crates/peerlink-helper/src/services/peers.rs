//! Listening, dialing and connection admission methods.

use async_trait::async_trait;
use serde_json::Value;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::PeerId;
use peerlink_core::protocol::rpc::{
    AddPeerReq, AddPeerResp, AddrsResp, BanReq, Empty, GatingConfigReq, IdentityResp, ListPeersResp, ListenReq,
    Method, RpcCall,
};

use crate::app_state::AppState;
use crate::dispatch::{reply, RpcService};
use crate::gating::AddrFilter;

pub struct PeerService;

#[async_trait]
impl RpcService for PeerService {
    fn methods(&self) -> &'static [Method] {
        &[
            Method::Listen,
            Method::GetListeningAddrs,
            Method::Identity,
            Method::AddPeer,
            Method::ListPeers,
            Method::SetGatingConfig,
            Method::BanPeer,
            Method::UnbanPeer,
        ]
    }

    fn prepare(&self, ctx: &AppState, method: Method, call: &RpcCall) -> Result<()> {
        match method {
            Method::AddPeer => admit_peer(ctx, &call.data()?),
            _ => Ok(()),
        }
    }

    async fn handle(&self, ctx: AppState, method: Method, call: RpcCall) -> Result<Value> {
        match method {
            Method::Listen => listen(&ctx, call.data()?).await,
            Method::GetListeningAddrs => reply(&AddrsResp { addrs: ctx.host().listen_addrs() }),
            Method::Identity => reply(&IdentityResp {
                peer_id: ctx.host().local_id(),
                addrs: ctx.host().listen_addrs(),
            }),
            Method::AddPeer => add_peer(&ctx, call.data()?).await,
            Method::ListPeers => reply(&ListPeersResp { peers: ctx.host().connected_peers() }),
            Method::SetGatingConfig => set_gating_config(&ctx, call.data()?).await,
            Method::BanPeer => ban(&ctx, call.data()?).await,
            Method::UnbanPeer => unban(&ctx, call.data()?),
            other => Err(PeerlinkError::UnknownMethod(other.as_str().to_string())),
        }
    }
}

async fn listen(ctx: &AppState, req: ListenReq) -> Result<Value> {
    if req.addrs.is_empty() {
        return Err(PeerlinkError::BadRequest("listen needs at least one address".into()));
    }
    let addrs = ctx.host().listen(req.addrs).await?;
    reply(&AddrsResp { addrs })
}

fn target_peer(req: &AddPeerReq) -> Result<PeerId> {
    req.addr
        .peer_id()
        .cloned()
        .ok_or_else(|| PeerlinkError::BadRequest(format!("{} must include /p2p/<peer>", req.addr)))
}

/// Gating half of `add_peer`; runs before the dial is spawned.
fn admit_peer(ctx: &AppState, req: &AddPeerReq) -> Result<()> {
    let peer = target_peer(req)?;
    if req.seed || req.trusted {
        ctx.gating().update(|s| {
            if req.seed {
                s.seeds.insert(peer.clone());
            }
            if req.trusted {
                s.trusted_peers.insert(peer.clone());
            }
            Ok(())
        })?;
    }
    ctx.host().add_addrs(&peer, vec![req.addr.clone()]);
    Ok(())
}

async fn add_peer(ctx: &AppState, req: AddPeerReq) -> Result<Value> {
    let peer_id = ctx.host().dial(&req.addr).await?;
    tracing::info!(%peer_id, addr = %req.addr, seed = req.seed, trusted = req.trusted, "peer added");
    reply(&AddPeerResp { peer_id })
}

async fn set_gating_config(ctx: &AppState, req: GatingConfigReq) -> Result<Value> {
    let next = ctx.gating().replace(&req)?;
    tracing::info!(
        banned_peers = next.banned_peers.len(),
        banned_addrs = next.banned_addrs.len(),
        trusted_peers = next.trusted_peers.len(),
        trusted_addrs = next.trusted_addrs.len(),
        isolate = next.isolate,
        "gating config replaced"
    );
    drop_banned(ctx).await;
    reply(&Empty {})
}

fn parse_ban(req: &BanReq) -> Result<Option<AddrFilter>> {
    if req.peer_id.is_none() && req.addr.is_none() {
        return Err(PeerlinkError::BadRequest("peer_id or addr is required".into()));
    }
    req.addr.as_deref().map(AddrFilter::parse).transpose()
}

async fn ban(ctx: &AppState, req: BanReq) -> Result<Value> {
    let filter = parse_ban(&req)?;
    ctx.gating().update(|s| {
        if let Some(p) = &req.peer_id {
            s.banned_peers.insert(p.clone());
        }
        if let Some(f) = filter {
            if !s.banned_addrs.contains(&f) {
                s.banned_addrs.push(f);
            }
        }
        Ok(())
    })?;
    tracing::info!(peer_id = ?req.peer_id, addr = ?req.addr, "banned");
    drop_banned(ctx).await;
    reply(&Empty {})
}

fn unban(ctx: &AppState, req: BanReq) -> Result<Value> {
    let filter = parse_ban(&req)?;
    ctx.gating().update(|s| {
        let mut removed = req.peer_id.as_ref().is_some_and(|p| s.banned_peers.remove(p));
        if let Some(f) = filter {
            let before = s.banned_addrs.len();
            s.banned_addrs.retain(|b| *b != f);
            removed |= s.banned_addrs.len() != before;
        }
        if removed {
            Ok(())
        } else {
            Err(PeerlinkError::NotFound("no matching ban".into()))
        }
    })?;
    tracing::info!(peer_id = ?req.peer_id, addr = ?req.addr, "unbanned");
    reply(&Empty {})
}

/// Disconnect connected peers that the current snapshot bans.
async fn drop_banned(ctx: &AppState) {
    let state = ctx.gating().snapshot();
    for info in ctx.host().connected_peers() {
        let banned = state.is_banned(Some(&info.peer_id), None)
            || info.addrs.iter().any(|a| state.is_banned(None, Some(a)));
        if !banned {
            continue;
        }
        match ctx.host().disconnect(&info.peer_id).await {
            Ok(()) => tracing::info!(peer_id = %info.peer_id, "disconnected banned peer"),
            Err(e) => tracing::debug!(peer_id = %info.peer_id, error = %e, "disconnect of banned peer failed"),
        }
    }
}
