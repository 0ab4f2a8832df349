//! Error types for wirecall.

use thiserror::Error;

/// Main error type for crate-level operations.
///
/// Failures that travel back to a caller are expressed as
/// [`CallError`](crate::status::CallError); this enum covers everything that
/// happens before a failure is turned into a wire value.
#[derive(Debug, Error)]
pub enum WirecallError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed frame, unknown kind, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame length exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u32, max: u32 },

    /// A service function with this name is already registered.
    #[error("Service function already registered: {0}")]
    DuplicateFunction(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using WirecallError.
pub type Result<T> = std::result::Result<T, WirecallError>;
