//! Codec module - the pluggable serializer behind every payload.
//!
//! The core never looks inside call arguments, results or events; it hands
//! them to a [`Codec`] and moves the resulting bytes around.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (the default)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are marker types with associated functions rather than trait
//! objects. [`Client`](crate::Client) and [`Service`](crate::Service) take the
//! codec as a type parameter, so the choice is made at compile time and both
//! ends of a connection must agree on it.
//!
//! # Example
//!
//! ```
//! use wirecall::codec::{Codec, JsonCodec, MsgPackCodec};
//!
//! let packed = MsgPackCodec::encode(&"hello").unwrap();
//! let text = JsonCodec::encode(&"hello").unwrap();
//! assert_eq!(text, b"\"hello\"");
//!
//! let decoded: String = MsgPackCodec::decode(&packed).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encodes and decodes typed payloads to and from bytes.
pub trait Codec: 'static {
    /// Short name used in log output.
    const NAME: &'static str;

    /// Encode a value.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    /// Decode a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
