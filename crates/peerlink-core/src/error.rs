//! Shared error type across peerlink crates.

use thiserror::Error;

/// Daemon-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid input / malformed message.
    BadRequest,
    /// Method name not in the supported set.
    UnknownMethod,
    /// Unsupported protocol version.
    UnsupportedVersion,
    /// Referenced object does not exist (or no longer exists).
    NotFound,
    /// Object already exists.
    AlreadyExists,
    /// Connection refused by admission control.
    Gated,
    /// Host capability failed (dial, negotiate, join...).
    Host,
    /// The byte channel or an internal queue is gone.
    ChannelClosed,
    /// Frame exceeds the configured limit.
    FrameTooLarge,
    /// Internal invariant violation.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnknownMethod => "UNKNOWN_METHOD",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Gated => "GATED",
            ErrorCode::Host => "HOST",
            ErrorCode::ChannelClosed => "CHANNEL_CLOSED",
            ErrorCode::FrameTooLarge => "FRAME_TOO_LARGE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PeerlinkError>;

/// Unified error type used by core and helper.
#[derive(Debug, Error)]
pub enum PeerlinkError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("connection gated: {0}")]
    Gated(String),
    #[error("host: {0}")]
    Host(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("internal: {0}")]
    Internal(String),
}

impl PeerlinkError {
    /// Map internal error to a stable daemon-facing code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PeerlinkError::BadRequest(_) => ErrorCode::BadRequest,
            PeerlinkError::UnknownMethod(_) => ErrorCode::UnknownMethod,
            PeerlinkError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            PeerlinkError::NotFound(_) => ErrorCode::NotFound,
            PeerlinkError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            PeerlinkError::Gated(_) => ErrorCode::Gated,
            PeerlinkError::Host(_) => ErrorCode::Host,
            PeerlinkError::ChannelClosed => ErrorCode::ChannelClosed,
            PeerlinkError::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,
            PeerlinkError::Internal(_) => ErrorCode::Internal,
        }
    }
}
