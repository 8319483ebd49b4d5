use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::rpc::{Method, RpcCall, RpcResponse};

use crate::app_state::AppState;

/// A group of RPC methods sharing one handler.
#[async_trait]
pub trait RpcService: Send + Sync {
    fn methods(&self) -> &'static [Method];

    /// Runs on the reader before `handle` is spawned or awaited. State changes
    /// made here are ordered with the calls read before and after this one.
    fn prepare(&self, _ctx: &AppState, _method: Method, _call: &RpcCall) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, ctx: AppState, method: Method, call: RpcCall) -> Result<Value>;

    /// Runs once the success response is in the outbound queue.
    fn after_reply(&self, _ctx: &AppState, _method: Method, _result: &Value) {}
}

/// Serialize a handler result.
pub fn reply<T: Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v).map_err(|e| PeerlinkError::Internal(format!("result encode failed: {e}")))
}

/// Method table. Every call produces exactly one `RpcResponse`.
#[derive(Default)]
pub struct Dispatcher {
    routes: DashMap<Method, Arc<dyn RpcService>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self { routes: DashMap::new() }
    }

    pub fn register(&self, svc: Arc<dyn RpcService>) {
        for m in svc.methods() {
            if self.routes.insert(*m, Arc::clone(&svc)).is_some() {
                tracing::warn!(method = m.as_str(), "method registered twice, last one wins");
            }
        }
    }

    fn route_of(&self, call: &RpcCall) -> Option<(Method, Arc<dyn RpcService>)> {
        let method = call.method().ok()?;
        let handler = self.routes.get(&method).map(|h| Arc::clone(h.value()))?;
        Some((method, handler))
    }

    /// Inline stage of a call. A failure here becomes the call's response.
    pub fn prepare(&self, ctx: &AppState, call: RpcCall) -> Result<RpcCall> {
        if let Some((method, handler)) = self.route_of(&call) {
            handler.prepare(ctx, method, &call)?;
        }
        Ok(call)
    }

    pub fn after_reply(&self, ctx: &AppState, method: Method, result: &Value) {
        if let Some(handler) = self.routes.get(&method).map(|h| Arc::clone(h.value())) {
            handler.after_reply(ctx, method, result);
        }
    }

    /// Route one decoded (or undecodable) call and build its response.
    pub async fn dispatch(&self, ctx: AppState, seq: u64, call: Result<RpcCall>) -> RpcResponse {
        let started = Instant::now();
        let (label, result) = self.route(ctx.clone(), call).await;

        let metrics = ctx.metrics();
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code().as_str(),
        };
        metrics.rpc_requests.inc(&[("method", label), ("outcome", outcome)]);
        metrics.rpc_duration.observe(&[("method", label)], started.elapsed());

        match result {
            Ok(v) => RpcResponse::success(seq, v),
            Err(e) => {
                tracing::debug!(seq, method = label, code = e.code().as_str(), error = %e, "rpc failed");
                RpcResponse::error(seq, e.to_string())
            }
        }
    }

    async fn route(&self, ctx: AppState, call: Result<RpcCall>) -> (&'static str, Result<Value>) {
        let call = match call {
            Ok(c) => c,
            Err(e) => return ("invalid", Err(e)),
        };
        let method = match call.method() {
            Ok(m) => m,
            Err(e) => return ("unknown", Err(e)),
        };
        let label = method.as_str();
        let Some(handler) = self.routes.get(&method).map(|h| Arc::clone(h.value())) else {
            return (label, Err(PeerlinkError::UnknownMethod(label.to_string())));
        };

        ctx.metrics().rpc_inflight.inc(&[("method", label)]);
        let result = handler.handle(ctx.clone(), method, call).await;
        ctx.metrics().rpc_inflight.dec(&[("method", label)]);
        (label, result)
    }
}
