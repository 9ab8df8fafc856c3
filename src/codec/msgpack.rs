//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`: structs go on the wire as maps keyed by field
//! name, so peers written against the field names can decode them and
//! fields can be added without breaking positional decoding.

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{KeyValue, QueryResponse, Response};
    use serde_bytes::ByteBuf;

    #[test]
    fn test_struct_is_encoded_as_map() {
        let kv = KeyValue {
            key: "a".to_string(),
            value: b"100".to_vec(),
        };

        let encoded = MsgPackCodec::encode(&kv).unwrap();

        // 0x82 = fixmap with 2 entries; positional encoding would be 0x92
        assert_eq!(encoded[0], 0x82, "Expected fixmap with 2 elements");
    }

    #[test]
    fn test_byte_fields_use_bin_format() {
        let kv = KeyValue {
            key: String::new(),
            value: vec![1, 2, 3],
        };
        let encoded = MsgPackCodec::encode(&kv).unwrap();

        // bin8 marker followed by the length
        let pos = encoded.windows(2).position(|w| w == [0xc4, 0x03]);
        assert!(pos.is_some(), "value should be encoded as bin8: {:02X?}", encoded);
    }

    #[test]
    fn test_nested_query_response() {
        let page = QueryResponse {
            results: vec![ByteBuf::from(
                MsgPackCodec::encode(&Response::success_with_message("x")).unwrap(),
            )],
            has_more: true,
            id: "cursor-1".to_string(),
        };

        let decoded: QueryResponse = MsgPackCodec::decode(&MsgPackCodec::encode(&page).unwrap()).unwrap();
        assert_eq!(decoded, page);

        let inner: Response = MsgPackCodec::decode(&decoded.results[0]).unwrap();
        assert_eq!(inner.message, "x");
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<KeyValue> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
