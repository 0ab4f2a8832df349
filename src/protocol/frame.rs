//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and body.
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use wirecall::protocol::{build_frame, FrameBuffer, FrameKind};
//!
//! let bytes = build_frame(FrameKind::Response, 42, b"hello");
//! let frames = FrameBuffer::new().push(&bytes).unwrap();
//!
//! assert_eq!(frames[0].call_id(), 42);
//! assert_eq!(frames[0].body(), b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{encode_length, FrameKind, Header, HEADER_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::{Result, WirecallError};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Split a payload (everything after the length prefix) into a frame.
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let header = Header::decode(&payload)?;
        let body = payload.split_off(HEADER_SIZE);
        Ok(Self { header, body })
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get the frame kind.
    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    /// Get the call id.
    #[inline]
    pub fn call_id(&self) -> u32 {
        self.header.call_id
    }

    /// Encode this frame back to wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        build_frame(self.header.kind, self.header.call_id, &self.body)
    }
}

/// Build a complete frame, length prefix included.
///
/// # Example
///
/// ```
/// use wirecall::protocol::{build_frame, FrameKind};
///
/// let bytes = build_frame(FrameKind::Event, 0, b"tick");
/// assert_eq!(bytes.len(), 4 + 5 + 4);
/// assert_eq!(&bytes[..4], &[0, 0, 0, 9]);
/// ```
pub fn build_frame(kind: FrameKind, call_id: u32, body: &[u8]) -> Bytes {
    let payload_len = (HEADER_SIZE + body.len()) as u32;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload_len as usize);
    buf.put_slice(&encode_length(payload_len));
    buf.put_slice(&Header::new(kind, call_id).encode());
    buf.put_slice(body);
    buf.freeze()
}

/// Body of a `Call` frame: the function name followed by encoded arguments.
///
/// ```text
/// ┌──────────┬──────────┬──────────────┐
/// │ Name len │ Name     │ Args         │
/// │ uint16 BE│ UTF-8    │ codec bytes  │
/// └──────────┴──────────┴──────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBody {
    /// Name of the service function.
    pub name: String,
    /// Codec-encoded argument tuple.
    pub args: Bytes,
}

impl CallBody {
    /// Encode a call body.
    pub fn encode(name: &str, args: &[u8]) -> Result<Bytes> {
        let name_len = u16::try_from(name.len()).map_err(|_| {
            WirecallError::Protocol(format!(
                "Function name of {} bytes is too long",
                name.len()
            ))
        })?;
        let mut buf = BytesMut::with_capacity(2 + name.len() + args.len());
        buf.put_u16(name_len);
        buf.put_slice(name.as_bytes());
        buf.put_slice(args);
        Ok(buf.freeze())
    }

    /// Parse a call body.
    pub fn parse(mut body: Bytes) -> Result<Self> {
        if body.len() < 2 {
            return Err(WirecallError::Protocol(
                "Call body is missing the function name".to_string(),
            ));
        }
        let name_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        if body.len() < 2 + name_len {
            return Err(WirecallError::Protocol(format!(
                "Call body truncated: name needs {} bytes, {} available",
                name_len,
                body.len() - 2
            )));
        }
        let args = body.split_off(2 + name_len);
        let name = std::str::from_utf8(&body[2..])
            .map_err(|e| WirecallError::Protocol(format!("Function name is not UTF-8: {}", e)))?
            .to_string();
        Ok(Self { name, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_frame_layout() {
        let bytes = build_frame(FrameKind::Response, 42, b"hello");

        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + HEADER_SIZE + 5);
        assert_eq!(&bytes[..4], &10u32.to_be_bytes());
        assert_eq!(bytes[4], FrameKind::Response as u8);
        assert_eq!(&bytes[5..9], &42u32.to_be_bytes());
        assert_eq!(&bytes[9..], b"hello");
    }

    #[test]
    fn test_frame_decode_splits_header() {
        let bytes = build_frame(FrameKind::Call, 7, b"body");
        let frame = Frame::decode(bytes.slice(LENGTH_PREFIX_SIZE..)).unwrap();

        assert_eq!(frame.kind(), FrameKind::Call);
        assert_eq!(frame.call_id(), 7);
        assert_eq!(frame.body(), b"body");
        assert_eq!(frame.to_bytes(), bytes);
    }

    #[test]
    fn test_frame_empty_body() {
        let bytes = build_frame(FrameKind::Event, 0, b"");
        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + HEADER_SIZE);

        let frame = Frame::decode(bytes.slice(LENGTH_PREFIX_SIZE..)).unwrap();
        assert!(frame.body().is_empty());
    }

    #[test]
    fn test_body_is_zero_copy() {
        let payload = Bytes::from(vec![2, 0, 0, 0, 1, b'x', b'y']);
        let frame = Frame::decode(payload.clone()).unwrap();
        assert_eq!(frame.body.as_ptr(), payload[HEADER_SIZE..].as_ptr());
    }

    #[test]
    fn test_call_body() {
        let body = CallBody::encode("set_alarm", &[0x92, 0xa1, b'x', 0x05]).unwrap();
        let parsed = CallBody::parse(body).unwrap();

        assert_eq!(parsed.name, "set_alarm");
        assert_eq!(&parsed.args[..], &[0x92, 0xa1, b'x', 0x05]);
    }

    #[test]
    fn test_call_body_without_args() {
        let parsed = CallBody::parse(CallBody::encode("get_time", b"").unwrap()).unwrap();
        assert_eq!(parsed.name, "get_time");
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn test_call_body_truncated() {
        assert!(CallBody::parse(Bytes::from_static(&[0])).is_err());
        assert!(CallBody::parse(Bytes::from_static(&[0, 9, b'g', b'e'])).is_err());
    }

    #[test]
    fn test_call_body_invalid_utf8() {
        let err = CallBody::parse(Bytes::from_static(&[0, 2, 0xff, 0xfe])).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_call_body_name_too_long() {
        let name = "x".repeat(70_000);
        assert!(CallBody::encode(&name, b"").is_err());
    }
}
