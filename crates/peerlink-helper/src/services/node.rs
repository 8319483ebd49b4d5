use async_trait::async_trait;
use serde_json::Value;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::rpc::{Method, RpcCall};

use crate::app_state::AppState;
use crate::dispatch::{reply, RpcService};
use crate::identity::Keypair;

/// Process-local queries that never touch the network.
pub struct NodeService;

#[async_trait]
impl RpcService for NodeService {
    fn methods(&self) -> &'static [Method] {
        &[Method::GetMetrics, Method::GenerateKeypair]
    }

    async fn handle(&self, ctx: AppState, method: Method, _call: RpcCall) -> Result<Value> {
        match method {
            Method::GetMetrics => reply(&*ctx.collector().latest()),
            Method::GenerateKeypair => reply(&Keypair::generate().to_resp()),
            other => Err(PeerlinkError::UnknownMethod(other.as_str().to_string())),
        }
    }
}
