//! Inbound side of the byte channel.
//!
//! Reads frames and runs each call's inline stage before reading on. Ordered
//! methods are then completed in place; the rest are spawned. A frame that
//! cannot be correlated is counted and skipped.

use tokio::io::AsyncRead;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::frame::{decode_frame, FrameKind};
use peerlink_core::protocol::rpc::{Method, RpcCall};

use crate::app_state::AppState;

use super::codec::read_frame;

/// Serve requests until the channel ends. Always returns an error: the
/// helper has no reason to live without its daemon.
pub async fn serve<R>(state: AppState, mut reader: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let max = state.cfg().helper.max_frame_bytes;
    loop {
        let Some(body) = read_frame(&mut reader, max).await? else {
            tracing::info!("byte channel reached end of stream");
            return Err(PeerlinkError::ChannelClosed);
        };

        let frame = match decode_frame(body) {
            Ok(f) => f,
            Err(e) => {
                state.metrics().decode_errors.inc(&[("code", e.code().as_str())]);
                tracing::warn!(error = %e, "undecodable frame skipped");
                continue;
            }
        };
        let (FrameKind::Request, Some(seq)) = (frame.kind, frame.seq) else {
            state.metrics().decode_errors.inc(&[("code", "UNEXPECTED_KIND")]);
            tracing::warn!(kind = ?frame.kind, "daemon sent a non-request frame");
            continue;
        };

        let call = RpcCall::decode(&frame.payload);
        let ordered = call
            .as_ref()
            .ok()
            .and_then(|c| c.method().ok())
            .map_or(true, Method::is_ordered);

        let request = state.handle_request(seq, call);
        if ordered {
            request.await?;
        } else {
            tokio::spawn(async move {
                if let Err(e) = request.await {
                    tracing::debug!(seq, error = %e, "response dropped");
                }
            });
        }
    }
}
