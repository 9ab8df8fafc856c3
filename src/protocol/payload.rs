//! Typed payloads carried inside [`ChaincodeMessage`](super::ChaincodeMessage).
//!
//! All of these travel as MsgPack maps (see [`MsgPackCodec`](crate::codec::MsgPackCodec)).

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::Timestamp;

/// Identity sent with REGISTER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeId {
    pub name: String,
}

/// Arguments of an INIT/TRANSACTION (and of a chaincode-to-chaincode call).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeInput {
    pub args: Vec<ByteBuf>,
}

impl ChaincodeInput {
    /// Build from anything byte-like.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self {
            args: args
                .into_iter()
                .map(|a| ByteBuf::from(a.as_ref().to_vec()))
                .collect(),
        }
    }
}

/// Payload of INVOKE_CHAINCODE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeSpec {
    pub chaincode_id: ChaincodeId,
    pub input: ChaincodeInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetState {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutState {
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelState {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStateByRange {
    pub start_key: String,
    pub end_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetQueryResult {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHistoryForKey {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStateNext {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStateClose {
    pub id: String,
}

/// One page of a paginated query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Encoded records ([`KeyValue`] or [`KeyModification`]).
    pub results: Vec<ByteBuf>,
    /// More pages are available under `id`.
    pub has_more: bool,
    /// Server-assigned cursor id.
    pub id: String,
}

/// Record yielded by range and rich queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

impl KeyValue {
    /// Value as UTF-8 text (lossy).
    pub fn string_value(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// Record yielded by history queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    pub tx_id: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    pub timestamp: Option<Timestamp>,
    pub is_delete: bool,
}

/// Result of `init`/`invoke`, and the payload of COMPLETED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: i32,
    pub message: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Response {
    /// Status for a successful response.
    pub const OK: i32 = 200;
    /// Statuses at or above this are errors.
    pub const ERROR_THRESHOLD: i32 = 400;
    /// Status for a failed response.
    pub const ERROR: i32 = 500;

    /// Success without message or payload.
    pub fn success() -> Self {
        Self::new(Self::OK, "", Vec::new())
    }

    /// Success with a message.
    pub fn success_with_message(message: impl Into<String>) -> Self {
        Self::new(Self::OK, message, Vec::new())
    }

    /// Success with a message and payload.
    pub fn success_with_payload(message: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Self::OK, message, payload)
    }

    /// Error with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Self::ERROR, message, Vec::new())
    }

    /// Error with a message and payload.
    pub fn error_with_payload(message: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Self::ERROR, message, payload)
    }

    /// Construct from parts.
    pub fn new(status: i32, message: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            message: message.into(),
            payload: payload.into(),
        }
    }

    /// True when `status` is below [`Response::ERROR_THRESHOLD`].
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status < Self::ERROR_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_classification() {
        assert!(Response::success().is_success());
        assert!(Response::success_with_message("OK response1").is_success());
        assert!(!Response::error("Wrong response1").is_success());
        assert!(!Response::new(Response::ERROR_THRESHOLD, "", Vec::new()).is_success());
        assert!(Response::new(399, "", Vec::new()).is_success());
    }

    #[test]
    fn test_chaincode_input_from_args() {
        let input = ChaincodeInput::from_args(["init", "a", "100"]);
        assert_eq!(input.args.len(), 3);
        assert_eq!(input.args[2].as_ref(), b"100");
    }

    #[test]
    fn test_key_value_string_value() {
        let kv = KeyValue {
            key: "a".into(),
            value: b"120".to_vec(),
        };
        assert_eq!(kv.string_value(), "120");
    }
}
