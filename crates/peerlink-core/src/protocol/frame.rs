//! Binary frame header parsing (panic-free).
//!
//! Layout after the transport's length prefix:
//! `v:u8 | kind:u8 | flags:u8 | [seq:u64 LE] | payload`
//!
//! `seq` is present for requests and responses only; upcalls carry no
//! correlation. Parsing never indexes the buffer directly, it always goes
//! through `Buf` with `remaining()` checks.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PeerlinkError, Result};

/// Current wire version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Response flag: payload is an error cause, not a success value.
pub const FLAG_ERROR: u8 = 0x01;

const HEADER_LEN: usize = 3;
const SEQ_LEN: usize = 8;

/// Outer tag of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    Upcall,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameKind::Request),
            2 => Some(FrameKind::Response),
            3 => Some(FrameKind::Upcall),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FrameKind::Request => 1,
            FrameKind::Response => 2,
            FrameKind::Upcall => 3,
        }
    }

    fn has_seq(self) -> bool {
        !matches!(self, FrameKind::Upcall)
    }
}

/// Parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Outer tag.
    pub kind: FrameKind,
    /// Feature flags (u8).
    pub flags: u8,
    /// Sequence number, `Some` for requests and responses.
    pub seq: Option<u64>,
    /// Opaque payload (zero-copy).
    pub payload: Bytes,
}

impl Frame {
    pub fn request(seq: u64, payload: Bytes) -> Self {
        Self { kind: FrameKind::Request, flags: 0, seq: Some(seq), payload }
    }

    pub fn response(seq: u64, is_error: bool, payload: Bytes) -> Self {
        let flags = if is_error { FLAG_ERROR } else { 0 };
        Self { kind: FrameKind::Response, flags, seq: Some(seq), payload }
    }

    pub fn upcall(payload: Bytes) -> Self {
        Self { kind: FrameKind::Upcall, flags: 0, seq: None, payload }
    }

    pub fn is_error(&self) -> bool {
        (self.flags & FLAG_ERROR) != 0
    }

    /// Serialize header + payload (without the transport length prefix).
    pub fn encode(&self) -> Bytes {
        let seq_len = if self.kind.has_seq() { SEQ_LEN } else { 0 };
        let mut out = BytesMut::with_capacity(HEADER_LEN + seq_len + self.payload.len());
        out.put_u8(PROTOCOL_VERSION);
        out.put_u8(self.kind.as_u8());
        out.put_u8(self.flags);
        if self.kind.has_seq() {
            out.put_u64_le(self.seq.unwrap_or_default());
        }
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// Decode a frame body.
pub fn decode_frame(mut buf: Bytes) -> Result<Frame> {
    if buf.remaining() < HEADER_LEN {
        return Err(PeerlinkError::BadRequest("frame too short".into()));
    }

    let v = buf.get_u8();
    if v != PROTOCOL_VERSION {
        return Err(PeerlinkError::UnsupportedVersion(v));
    }

    let kind_raw = buf.get_u8();
    let kind = FrameKind::from_u8(kind_raw)
        .ok_or_else(|| PeerlinkError::BadRequest(format!("unknown frame kind: {kind_raw}")))?;
    let flags = buf.get_u8();

    let seq = if kind.has_seq() {
        if buf.remaining() < SEQ_LEN {
            return Err(PeerlinkError::BadRequest("frame kind requires u64 seq".into()));
        }
        Some(buf.get_u64_le())
    } else {
        None
    };

    let payload = buf.copy_to_bytes(buf.remaining());

    Ok(Frame { kind, flags, seq, payload })
}
