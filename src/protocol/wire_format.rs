//! Wire format encoding and decoding.
//!
//! Every frame is a length prefix followed by a payload that starts with a
//! 5-byte header:
//! ```text
//! ┌──────────┬───────┬──────────┬─────────────┐
//! │ Length   │ Kind  │ Call ID  │ Body        │
//! │ 4 bytes  │ 1 byte│ 4 bytes  │ Length - 5  │
//! │ uint32 BE│       │ uint32 BE│             │
//! └──────────┴───────┴──────────┴─────────────┘
//! ```
//!
//! `Length` counts the header and the body, never itself.
//! All multi-byte integers are Big Endian.

use crate::error::{Result, WirecallError};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the payload header (kind + call id).
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload length (64 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Call id carried by event frames.
pub const EVENT_CALL_ID: u32 = 0;

/// Discriminator of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Client → service: invoke a named function.
    Call = 1,
    /// Service → client: the result of one call.
    Response = 2,
    /// Service → client: unsolicited broadcast.
    Event = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = WirecallError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameKind::Call),
            2 => Ok(FrameKind::Response),
            3 => Ok(FrameKind::Event),
            other => Err(WirecallError::Protocol(format!(
                "Unknown frame kind {}",
                other
            ))),
        }
    }
}

/// Decoded payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// What the body contains.
    pub kind: FrameKind,
    /// Correlation id (0 for events).
    pub call_id: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: FrameKind, call_id: u32) -> Self {
        Self { kind, call_id }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use wirecall::protocol::{FrameKind, Header};
    ///
    /// let bytes = Header::new(FrameKind::Response, 42).encode();
    /// assert_eq!(bytes, [2, 0, 0, 0, 42]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1..5].copy_from_slice(&self.call_id.to_be_bytes());
        buf
    }

    /// Decode header from the start of a payload.
    ///
    /// Fails if the payload is shorter than [`HEADER_SIZE`] or the kind byte
    /// is unknown.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(WirecallError::Protocol(format!(
                "Payload of {} bytes is shorter than the {}-byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }
        Ok(Self {
            kind: FrameKind::try_from(buf[0])?,
            call_id: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }
}

/// Encode a payload length prefix.
#[inline]
pub fn encode_length(length: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    length.to_be_bytes()
}

/// Decode and validate a payload length prefix.
///
/// Zero-length and undersized payloads are protocol violations, as are
/// payloads larger than `max_frame_size`.
pub fn decode_length(buf: [u8; LENGTH_PREFIX_SIZE], max_frame_size: u32) -> Result<u32> {
    let length = u32::from_be_bytes(buf);
    validate_length(length, max_frame_size)?;
    Ok(length)
}

/// Validate a payload length.
pub fn validate_length(length: u32, max_frame_size: u32) -> Result<()> {
    if length == 0 {
        return Err(WirecallError::Protocol("Zero-length frame".to_string()));
    }
    if (length as usize) < HEADER_SIZE {
        return Err(WirecallError::Protocol(format!(
            "Frame length {} is shorter than the {}-byte header",
            length, HEADER_SIZE
        )));
    }
    if length > max_frame_size {
        return Err(WirecallError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }
    Ok(())
}
