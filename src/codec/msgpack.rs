//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named`: structs are written as maps keyed by field
//! name, so peers that decode into a different struct layout (or a dynamic
//! value) still see field names.
//!
//! # Example
//!
//! ```
//! use wirecall::codec::{Codec, MsgPackCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Alarm {
//!     id: u32,
//!     tag: String,
//! }
//!
//! let alarm = Alarm { id: 42, tag: "wake".to_string() };
//! let encoded = MsgPackCodec::encode(&alarm).unwrap();
//! let decoded: Alarm = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, alarm);
//! ```

use super::Codec;
use crate::error::Result;

/// MessagePack codec for structured data.
///
/// This is the default codec of [`Client`](crate::Client) and
/// [`Service`](crate::Service).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    const NAME: &'static str = "msgpack";

    #[inline]
    fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{CallError, CallResult};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct AlarmRequest {
        tag: String,
        after_ms: u64,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    enum ClockEvent {
        Alarm { id: u32, tag: String },
        Tick(u64),
        Stopped,
    }

    #[test]
    fn test_struct_is_written_as_map() {
        let req = AlarmRequest {
            tag: "stop".to_string(),
            after_ms: 16_000,
        };

        let encoded = MsgPackCodec::encode(&req).unwrap();

        // fixmap with 2 entries, not fixarray (0x92)
        assert_eq!(encoded[0], 0x82, "Expected fixmap, got {:02X}", encoded[0]);

        let decoded: AlarmRequest = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_argument_tuples() {
        let args = ("stop".to_string(), 16_000u64);
        let encoded = MsgPackCodec::encode(&args).unwrap();
        assert_eq!(encoded[0], 0x92, "Tuples encode as fixarray");

        let decoded: (String, u64) = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_unit_is_nil() {
        let encoded = MsgPackCodec::encode(&()).unwrap();
        assert_eq!(encoded, vec![0xc0]);
        MsgPackCodec::decode::<()>(&encoded).unwrap();
    }

    #[test]
    fn test_call_result_variants() {
        let ok: CallResult<u32> = Ok(7);
        let encoded = MsgPackCodec::encode(&ok).unwrap();
        let decoded: CallResult<u32> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, Ok(7));

        let err: CallResult<u32> = Err(CallError::not_found("missing"));
        let encoded = MsgPackCodec::encode(&err).unwrap();
        let decoded: CallResult<u32> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, Err(CallError::not_found("missing")));
    }

    #[test]
    fn test_error_result_decodes_into_any_value_type() {
        let err: CallResult<()> = Err(CallError::not_found("missing"));
        let encoded = MsgPackCodec::encode(&err).unwrap();

        let decoded: CallResult<Vec<String>> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.unwrap_err().code(), crate::status::codes::FUNCTION_NOT_FOUND);
    }

    #[test]
    fn test_event_variants_carry_their_tag() {
        let events = vec![
            ClockEvent::Alarm {
                id: 3,
                tag: "stop".to_string(),
            },
            ClockEvent::Tick(1_700_000_000),
            ClockEvent::Stopped,
        ];

        for event in events {
            let encoded = MsgPackCodec::encode(&event).unwrap();
            let decoded: ClockEvent = MsgPackCodec::decode(&encoded).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<AlarmRequest> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_error_on_wrong_shape() {
        let encoded = MsgPackCodec::encode(&"just a string").unwrap();
        let result: Result<AlarmRequest> = MsgPackCodec::decode(&encoded);
        assert!(result.is_err());
    }
}
