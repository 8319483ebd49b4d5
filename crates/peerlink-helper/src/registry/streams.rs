use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::PeerId;

use super::arena::Arena;
use crate::host::StreamFrame;

/// An open stream: the write side plus the read side, which is either
/// waiting for its reader or owned by the reader task.
pub struct StreamEntry {
    pub peer: PeerId,
    pub protocol: String,
    pub tx: mpsc::Sender<StreamFrame>,
    inbound: Option<mpsc::Receiver<StreamFrame>>,
    reader: Option<JoinHandle<()>>,
}

impl StreamEntry {
    /// Stop the reader and send a final frame to the remote.
    pub fn finish(self, last: StreamFrame) {
        if let Some(reader) = self.reader {
            reader.abort();
        }
        match self.tx.try_send(last) {
            Ok(()) => {}
            Err(TrySendError::Full(last)) => {
                let tx = self.tx;
                tokio::spawn(async move {
                    let _ = tx.send(last).await;
                });
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(peer = %self.peer, protocol = %self.protocol, "remote end already gone");
            }
        }
    }
}

/// `stream_id -> StreamEntry`. Presence in the registry means open.
pub struct StreamRegistry {
    arena: Arena<StreamEntry>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self { arena: Arena::new("stream") }
    }

    pub fn open(
        &self,
        peer: PeerId,
        protocol: String,
        tx: mpsc::Sender<StreamFrame>,
        rx: mpsc::Receiver<StreamFrame>,
    ) -> Result<u64> {
        self.arena.alloc(StreamEntry { peer, protocol, tx, inbound: Some(rx), reader: None })
    }

    /// Hand the read side to its reader. `None` once taken or after the
    /// stream ended.
    pub fn take_inbound(&self, id: u64) -> Option<mpsc::Receiver<StreamFrame>> {
        self.arena.with_mut(id, |e| e.inbound.take()).flatten()
    }

    /// Attach the reader task. If the stream already ended the handle is dropped.
    pub fn attach_reader(&self, id: u64, reader: JoinHandle<()>) {
        let attached = self.arena.with_mut(id, |e| e.reader = Some(reader));
        if attached.is_none() {
            tracing::debug!(stream_id = id, "stream ended before reader attached");
        }
    }

    pub fn sender(&self, id: u64) -> Result<mpsc::Sender<StreamFrame>> {
        self.arena
            .with(id, |e| e.tx.clone())
            .ok_or_else(|| PeerlinkError::NotFound(format!("stream {id}")))
    }

    pub fn remove(&self, id: u64) -> Option<StreamEntry> {
        self.arena.remove(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn drain(&self) -> Vec<(u64, StreamEntry)> {
        self.arena.drain()
    }
}
