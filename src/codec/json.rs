//! JSON codec using `serde_json`.
//!
//! Slower and larger than [`MsgPackCodec`](super::MsgPackCodec), but frames
//! stay readable in a packet capture.

use super::Codec;
use crate::error::Result;

/// JSON codec for structured data.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    const NAME: &'static str = "json";

    #[inline]
    fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{CallError, CallResult};

    #[test]
    fn test_encodes_readable_text() {
        let encoded = JsonCodec::encode(&("stop", 16_000u64)).unwrap();
        assert_eq!(encoded, br#"["stop",16000]"#);
    }

    #[test]
    fn test_call_result_shape() {
        let err: CallResult<u32> = Err(CallError::not_found("f"));
        let encoded = JsonCodec::encode(&err).unwrap();
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.starts_with(r#"{"Err":{"code":20"#), "{}", text);

        let decoded: CallResult<u32> = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, err);
    }

    #[test]
    fn test_decode_error() {
        assert!(JsonCodec::decode::<u32>(b"{not json").is_err());
    }
}
