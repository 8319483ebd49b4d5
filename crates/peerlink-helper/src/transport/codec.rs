//! Length-delimited framing on the byte channel.
//!
//! Every frame is a `u32` big-endian body length followed by the body. The
//! body itself is parsed by `peerlink_core::protocol::frame`.

use std::io::ErrorKind;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use peerlink_core::error::{PeerlinkError, Result};

/// Read one frame body. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(r: &mut R, max_frame_bytes: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let len = match r.read_u32().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            tracing::warn!(error = %e, "channel read failed");
            return Err(PeerlinkError::ChannelClosed);
        }
    };
    if len > max_frame_bytes {
        return Err(PeerlinkError::FrameTooLarge { len, max: max_frame_bytes });
    }

    let mut buf = BytesMut::zeroed(len);
    if let Err(e) = r.read_exact(&mut buf).await {
        tracing::warn!(error = %e, len, "channel closed mid-frame");
        return Err(PeerlinkError::ChannelClosed);
    }
    Ok(Some(buf.freeze()))
}

/// Write one frame body with its length prefix. Does not flush.
pub async fn write_frame<W>(w: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| PeerlinkError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;
    w.write_u32(len).await.map_err(write_failed)?;
    w.write_all(body).await.map_err(write_failed)
}

fn write_failed(e: std::io::Error) -> PeerlinkError {
    tracing::warn!(error = %e, "channel write failed");
    PeerlinkError::ChannelClosed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn length_prefix_roundtrip_and_clean_eof() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello").await.unwrap();
        drop(a);
        assert_eq!(read_frame(&mut b, 1024).await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(read_frame(&mut b, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frame_is_refused_before_reading_body() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(4096).await.unwrap();
        let e = read_frame(&mut b, 1024).await.unwrap_err();
        assert_eq!(e.code().as_str(), "FRAME_TOO_LARGE");
    }

    #[tokio::test]
    async fn truncated_body_is_channel_loss() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(10).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert_eq!(read_frame(&mut b, 1024).await.unwrap_err().code().as_str(), "CHANNEL_CLOSED");
    }
}
