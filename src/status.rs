//! Call outcomes as they travel on the wire.
//!
//! Every asynchronous operation resolves to a [`CallResult`]: either the
//! returned value or a [`CallError`] carrying a numeric code and a message.
//! Codes are grouped into domains (see [`ErrorDomain`]) so callers can tell a
//! lost connection from a handler-reported failure without string matching.
//!
//! # Example
//!
//! ```
//! use wirecall::status::{codes, CallError, ErrorDomain};
//!
//! let err = CallError::not_found("get_time");
//! assert_eq!(err.code(), codes::FUNCTION_NOT_FOUND);
//! assert_eq!(err.domain(), ErrorDomain::Routing);
//!
//! let app = CallError::application(codes::APPLICATION + 1, "alarm not set");
//! assert_eq!(app.domain(), ErrorDomain::Application);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WirecallError;

/// Outcome of a remote call.
pub type CallResult<T> = std::result::Result<T, CallError>;

/// Well-known error codes.
pub mod codes {
    /// I/O failure reported by a transport.
    pub const TRANSPORT: i32 = 1;
    /// Call or write attempted while the transport is not open.
    pub const NOT_CONNECTED: i32 = 2;
    /// `open` on a transport that is already open or connecting.
    pub const ALREADY_OPEN: i32 = 3;
    /// Pending call flushed because the connection went away.
    pub const CONNECTION_LOST: i32 = 4;
    /// Caller-configured call timeout expired.
    pub const TIMEOUT: i32 = 5;

    /// Malformed frame, zero length, unknown frame kind.
    pub const PROTOCOL: i32 = 10;
    /// Serializer could not encode a value.
    pub const ENCODE: i32 = 11;
    /// Serializer could not decode a value.
    pub const DECODE: i32 = 12;

    /// No service function registered under the called name.
    pub const FUNCTION_NOT_FOUND: i32 = 20;

    /// Handler dropped its responder without answering.
    pub const NO_RESPONSE: i32 = 30;
    /// First code available to application handlers.
    pub const APPLICATION: i32 = 100;
}

/// Coarse classification of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    /// Connect/read/write failures. Fatal to the connection.
    Transport,
    /// Framing and serialization failures.
    Protocol,
    /// Unknown call name. The connection stays open.
    Routing,
    /// Failure reported by a handler. Local to one call.
    Application,
}

/// Error value delivered to result sinks and carried in response frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallError {
    code: i32,
    message: String,
}

impl CallError {
    /// Create an error with an arbitrary code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Application-domain error raised by a handler.
    pub fn application(code: i32, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    /// Transport-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(codes::TRANSPORT, message)
    }

    /// Transport is not open.
    pub fn not_connected() -> Self {
        Self::new(codes::NOT_CONNECTED, "Transport is not connected")
    }

    /// Transport is already open or connecting.
    pub fn already_open() -> Self {
        Self::new(codes::ALREADY_OPEN, "Transport is already connected")
    }

    /// Connection went away with the call still pending.
    pub fn connection_lost() -> Self {
        Self::new(codes::CONNECTION_LOST, "Connection lost")
    }

    /// Call timed out on the caller side.
    pub fn timeout() -> Self {
        Self::new(codes::TIMEOUT, "Call timed out")
    }

    /// Framing violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(codes::PROTOCOL, message)
    }

    /// Encoding failure.
    pub fn encode(message: impl fmt::Display) -> Self {
        Self::new(codes::ENCODE, format!("Encode failed: {}", message))
    }

    /// Decoding failure.
    pub fn decode(message: impl fmt::Display) -> Self {
        Self::new(codes::DECODE, format!("Decode failed: {}", message))
    }

    /// Unknown service function.
    pub fn not_found(name: &str) -> Self {
        Self::new(
            codes::FUNCTION_NOT_FOUND,
            format!("Service function not found: {}", name),
        )
    }

    /// Handler dropped its responder.
    pub fn no_response() -> Self {
        Self::new(codes::NO_RESPONSE, "Handler finished without responding")
    }

    /// Numeric error code.
    #[inline]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Domain the code belongs to.
    pub fn domain(&self) -> ErrorDomain {
        match self.code {
            1..=9 => ErrorDomain::Transport,
            10..=19 => ErrorDomain::Protocol,
            20..=29 => ErrorDomain::Routing,
            _ => ErrorDomain::Application,
        }
    }

    /// True for errors that tear down the connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(self.domain(), ErrorDomain::Transport | ErrorDomain::Protocol)
            && self.code != codes::ENCODE
            && self.code != codes::DECODE
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CallError {}

impl From<std::io::Error> for CallError {
    fn from(e: std::io::Error) -> Self {
        CallError::transport(e.to_string())
    }
}

impl From<WirecallError> for CallError {
    fn from(e: WirecallError) -> Self {
        match e {
            WirecallError::Io(e) => CallError::from(e),
            WirecallError::MsgPackEncode(e) => CallError::encode(e),
            WirecallError::MsgPackDecode(e) => CallError::decode(e),
            WirecallError::Json(e) => CallError::decode(e),
            e @ (WirecallError::Protocol(_) | WirecallError::FrameTooLarge { .. }) => {
                CallError::protocol(e.to_string())
            }
            WirecallError::ConnectionClosed => CallError::connection_lost(),
            e @ WirecallError::DuplicateFunction(_) => {
                CallError::application(codes::APPLICATION, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains() {
        assert_eq!(CallError::transport("x").domain(), ErrorDomain::Transport);
        assert_eq!(CallError::connection_lost().domain(), ErrorDomain::Transport);
        assert_eq!(CallError::timeout().domain(), ErrorDomain::Transport);
        assert_eq!(CallError::protocol("x").domain(), ErrorDomain::Protocol);
        assert_eq!(CallError::decode("x").domain(), ErrorDomain::Protocol);
        assert_eq!(CallError::not_found("f").domain(), ErrorDomain::Routing);
        assert_eq!(CallError::no_response().domain(), ErrorDomain::Application);
        assert_eq!(
            CallError::application(codes::APPLICATION, "x").domain(),
            ErrorDomain::Application
        );
    }

    #[test]
    fn test_connection_errors() {
        assert!(CallError::connection_lost().is_connection_error());
        assert!(CallError::protocol("bad").is_connection_error());
        assert!(!CallError::decode("bad args").is_connection_error());
        assert!(!CallError::not_found("f").is_connection_error());
        assert!(!CallError::application(150, "nope").is_connection_error());
    }

    #[test]
    fn test_display() {
        let err = CallError::not_found("get_time");
        assert_eq!(err.to_string(), "[20] Service function not found: get_time");
    }

    #[test]
    fn test_from_crate_error() {
        let err: CallError = WirecallError::Protocol("zero-length frame".into()).into();
        assert_eq!(err.code(), codes::PROTOCOL);
        assert!(err.message().contains("zero-length frame"));

        let err: CallError = WirecallError::FrameTooLarge { size: 10, max: 5 }.into();
        assert_eq!(err.code(), codes::PROTOCOL);

        let err: CallError = WirecallError::ConnectionClosed.into();
        assert_eq!(err.code(), codes::CONNECTION_LOST);

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: CallError = WirecallError::Io(io).into();
        assert_eq!(err.code(), codes::TRANSPORT);
    }

    #[test]
    fn test_result_misuse_is_checked() {
        let failed: CallResult<u32> = Err(CallError::connection_lost());
        assert!(failed.as_ref().ok().is_none());
        assert_eq!(failed.unwrap_or(7), 7);
    }
}
