use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::rpc::RpcResponse;
use peerlink_core::protocol::upcall::Upcall;

use crate::obs::metrics::HelperMetrics;
use crate::transport::codec::write_frame;

/// Producer side of the outbound queue.
///
/// Responses and upcalls share one bounded queue so the channel sees them in
/// enqueue order. A full queue parks the producer only.
#[derive(Clone)]
pub struct UpcallEmitter {
    tx: mpsc::Sender<Bytes>,
    suppress: bool,
    metrics: Arc<HelperMetrics>,
}

/// Consumer side, owned by the single writer task.
pub struct OutboundQueue {
    rx: mpsc::Receiver<Bytes>,
}

impl UpcallEmitter {
    pub fn new(capacity: usize, suppress: bool, metrics: Arc<HelperMetrics>) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, suppress, metrics }, OutboundQueue { rx })
    }

    /// Whether asynchronous events are being dropped.
    pub fn suppressed(&self) -> bool {
        self.suppress
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue an RPC response. Never suppressed.
    pub async fn respond(&self, resp: &RpcResponse) -> Result<()> {
        let frame = resp.encode()?;
        self.tx.send(frame).await.map_err(|_| PeerlinkError::ChannelClosed)
    }

    /// Enqueue an upcall. Returns false if it was suppressed or the queue is gone.
    pub async fn emit(&self, upcall: Upcall) -> bool {
        let kind = upcall.name();
        if self.suppress {
            self.metrics.upcalls_suppressed.inc(&[("type", kind)]);
            return false;
        }
        let frame = match upcall.encode() {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, kind, "upcall encode failed");
                return false;
            }
        };
        if self.tx.send(frame).await.is_err() {
            tracing::debug!(kind, "outbound queue closed, upcall dropped");
            return false;
        }
        self.metrics.upcalls.inc(&[("type", kind)]);
        true
    }
}

impl OutboundQueue {
    /// Write queued frames in order until every producer is gone or `stop`
    /// fires. On stop, frames already queued are still written.
    pub async fn run<W>(mut self, mut out: W, stop: oneshot::Receiver<()>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        tokio::pin!(stop);
        let mut stopping = false;
        loop {
            let next = if stopping {
                self.rx.recv().await
            } else {
                tokio::select! {
                    f = self.rx.recv() => f,
                    _ = &mut stop => {
                        stopping = true;
                        self.rx.close();
                        continue;
                    }
                }
            };
            let Some(frame) = next else { break };

            write_frame(&mut out, &frame).await?;
            // batch writes while more frames are already queued
            if self.rx.is_empty() {
                out.flush().await.map_err(|e| {
                    tracing::warn!(error = %e, "channel flush failed");
                    PeerlinkError::ChannelClosed
                })?;
            }
        }
        out.flush().await.map_err(|_| PeerlinkError::ChannelClosed)?;
        tracing::debug!("outbound writer finished");
        Ok(())
    }
}
