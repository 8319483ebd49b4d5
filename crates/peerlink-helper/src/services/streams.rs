//! Stream negotiation and the per-stream reader pump.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::rpc::{
    Empty, Method, OpenStreamReq, OpenStreamResp, RpcCall, SendStreamReq, StreamHandlerReq, StreamIdReq,
};
use peerlink_core::protocol::upcall::Upcall;
use peerlink_core::{Multiaddr, PeerId};

use crate::app_state::AppState;
use crate::dispatch::{reply, RpcService};
use crate::host::{StreamConn, StreamFrame};

pub struct StreamService;

#[async_trait]
impl RpcService for StreamService {
    fn methods(&self) -> &'static [Method] {
        &[
            Method::AddStreamHandler,
            Method::RemoveStreamHandler,
            Method::OpenStream,
            Method::SendStream,
            Method::CloseStream,
            Method::ResetStream,
        ]
    }

    async fn handle(&self, ctx: AppState, method: Method, call: RpcCall) -> Result<Value> {
        match method {
            Method::AddStreamHandler => add_handler(&ctx, call.data()?),
            Method::RemoveStreamHandler => remove_handler(&ctx, call.data()?),
            Method::OpenStream => open_stream(&ctx, call.data()?).await,
            Method::SendStream => send_stream(&ctx, call.data()?).await,
            Method::CloseStream => finish_stream(&ctx, call.data()?, StreamFrame::Close),
            Method::ResetStream => finish_stream(&ctx, call.data()?, StreamFrame::Reset),
            other => Err(PeerlinkError::UnknownMethod(other.as_str().to_string())),
        }
    }

    /// An outbound stream is pumped only once the daemon has its id.
    fn after_reply(&self, ctx: &AppState, method: Method, result: &Value) {
        if method != Method::OpenStream {
            return;
        }
        match result.get("stream_id").and_then(Value::as_u64) {
            Some(stream_id) => start_reader(ctx, stream_id),
            None => tracing::error!(%result, "open_stream reply without a stream id"),
        }
    }
}

fn check_protocol(protocol: &str) -> Result<()> {
    if !protocol.starts_with('/') {
        return Err(PeerlinkError::BadRequest(format!("protocol id must start with '/': {protocol}")));
    }
    Ok(())
}

fn add_handler(ctx: &AppState, req: StreamHandlerReq) -> Result<Value> {
    check_protocol(&req.protocol)?;
    ctx.host().set_stream_handler(&req.protocol);
    tracing::info!(protocol = %req.protocol, "stream handler added");
    reply(&Empty {})
}

fn remove_handler(ctx: &AppState, req: StreamHandlerReq) -> Result<Value> {
    if !ctx.host().remove_stream_handler(&req.protocol) {
        return Err(PeerlinkError::NotFound(format!("stream handler {}", req.protocol)));
    }
    reply(&Empty {})
}

async fn open_stream(ctx: &AppState, req: OpenStreamReq) -> Result<Value> {
    check_protocol(&req.protocol)?;
    let peer = if req.peer.starts_with('/') {
        let addr = Multiaddr::from_str(&req.peer)?;
        ctx.host().dial(&addr).await?
    } else {
        PeerId::from_str(&req.peer)?
    };

    let conn = ctx.host().open_stream(&peer, &req.protocol).await?;
    let stream_id = register(ctx, conn)?;

    tracing::debug!(stream_id, %peer, protocol = %req.protocol, "stream opened");
    reply(&OpenStreamResp { stream_id, peer })
}

async fn send_stream(ctx: &AppState, req: SendStreamReq) -> Result<Value> {
    let tx = ctx.streams().sender(req.stream_id)?;
    tx.send(StreamFrame::Data(req.data))
        .await
        .map_err(|_| PeerlinkError::Host(format!("stream {} is closed by the remote", req.stream_id)))?;
    reply(&Empty {})
}

fn finish_stream(ctx: &AppState, req: StreamIdReq, last: StreamFrame) -> Result<Value> {
    let entry = ctx
        .streams()
        .remove(req.stream_id)
        .ok_or_else(|| PeerlinkError::NotFound(format!("stream {}", req.stream_id)))?;
    tracing::debug!(stream_id = req.stream_id, peer = %entry.peer, ?last, "stream finished locally");
    entry.finish(last);
    reply(&Empty {})
}

/// Store both sides; the caller starts the reader once the daemon can
/// know the id.
fn register(ctx: &AppState, conn: StreamConn) -> Result<u64> {
    let StreamConn { peer, protocol, tx, rx } = conn;
    ctx.streams().open(peer, protocol, tx, rx)
}

fn start_reader(ctx: &AppState, stream_id: u64) {
    let Some(mut rx) = ctx.streams().take_inbound(stream_id) else {
        tracing::debug!(stream_id, "stream finished before its reader started");
        return;
    };
    let streams = std::sync::Arc::clone(ctx.streams());
    let emitter = ctx.emitter().clone();
    let reader = tokio::spawn(async move {
        let ended = loop {
            match rx.recv().await {
                Some(StreamFrame::Data(data)) => {
                    emitter.emit(Upcall::StreamData { stream_id, data }).await;
                }
                Some(StreamFrame::Close) => break Upcall::StreamClosed { stream_id },
                Some(StreamFrame::Reset) | None => break Upcall::StreamReset { stream_id },
            }
        };
        // a local close/reset already removed the entry
        if streams.remove(stream_id).is_some() {
            emitter.emit(ended).await;
        }
    });
    ctx.streams().attach_reader(stream_id, reader);
}

/// Register an inbound stream, announce it, then start pumping it.
pub(crate) async fn accept_incoming(ctx: &AppState, conn: StreamConn) {
    let peer = conn.peer.clone();
    let protocol = conn.protocol.clone();
    let stream_id = match register(ctx, conn) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(%peer, %protocol, error = %e, "cannot register inbound stream");
            return;
        }
    };
    tracing::debug!(stream_id, %peer, %protocol, "inbound stream");
    ctx.emitter()
        .emit(Upcall::IncomingStream { stream_id, peer, protocol })
        .await;
    start_reader(ctx, stream_id);
}
