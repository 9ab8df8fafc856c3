//! Chaincode messages exchanged with the peer.
//!
//! A [`ChaincodeMessage`] is the unit of traffic on the stream: a type tag,
//! the `(channel_id, txid)` pair it belongs to, an opaque payload and an
//! optional timestamp. The payload is itself MsgPack for most types (see
//! [`payload`](super::payload)).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Closed set of message types understood by the shim.
///
/// Discriminants follow the peer's numbering so captured traffic stays
/// readable next to peer logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Register = 1,
    Registered = 2,
    Init = 3,
    Ready = 4,
    Transaction = 5,
    Completed = 6,
    Error = 7,
    GetState = 8,
    PutState = 9,
    DelState = 10,
    InvokeChaincode = 11,
    Response = 13,
    GetStateByRange = 14,
    GetQueryResult = 15,
    QueryStateNext = 16,
    QueryStateClose = 17,
    Keepalive = 18,
    GetHistoryForKey = 19,
}

impl MessageType {
    /// Map a raw wire byte to a known type.
    pub fn from_u8(value: u8) -> Option<Self> {
        let ty = match value {
            1 => Self::Register,
            2 => Self::Registered,
            3 => Self::Init,
            4 => Self::Ready,
            5 => Self::Transaction,
            6 => Self::Completed,
            7 => Self::Error,
            8 => Self::GetState,
            9 => Self::PutState,
            10 => Self::DelState,
            11 => Self::InvokeChaincode,
            13 => Self::Response,
            14 => Self::GetStateByRange,
            15 => Self::GetQueryResult,
            16 => Self::QueryStateNext,
            17 => Self::QueryStateClose,
            18 => Self::Keepalive,
            19 => Self::GetHistoryForKey,
            _ => return None,
        };
        Some(ty)
    }

    /// Wire byte for this type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// INIT or TRANSACTION.
    #[inline]
    pub fn is_invocation(self) -> bool {
        matches!(self, Self::Init | Self::Transaction)
    }

    /// Messages that answer a stub call.
    #[inline]
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }

    /// Upper-case name as used in peer logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Registered => "REGISTERED",
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Transaction => "TRANSACTION",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::GetState => "GET_STATE",
            Self::PutState => "PUT_STATE",
            Self::DelState => "DEL_STATE",
            Self::InvokeChaincode => "INVOKE_CHAINCODE",
            Self::Response => "RESPONSE",
            Self::GetStateByRange => "GET_STATE_BY_RANGE",
            Self::GetQueryResult => "GET_QUERY_RESULT",
            Self::QueryStateNext => "QUERY_STATE_NEXT",
            Self::QueryStateClose => "QUERY_STATE_CLOSE",
            Self::Keepalive => "KEEPALIVE",
            Self::GetHistoryForKey => "GET_HISTORY_FOR_KEY",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Seconds/nanos timestamp attached to invocation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: elapsed.as_secs() as i64,
            nanos: elapsed.subsec_nanos() as i32,
        }
    }
}

/// A message on the peer stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodeMessage {
    /// Message type.
    pub msg_type: MessageType,
    /// Channel the transaction runs on.
    pub channel_id: String,
    /// Transaction id.
    pub txid: String,
    /// Opaque payload (MsgPack for most types, UTF-8 text for ERROR).
    pub payload: Bytes,
    /// Optional timestamp.
    pub timestamp: Option<Timestamp>,
}

impl ChaincodeMessage {
    /// Create a message without timestamp.
    pub fn new(
        msg_type: MessageType,
        channel_id: impl Into<String>,
        txid: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            msg_type,
            channel_id: channel_id.into(),
            txid: txid.into(),
            payload: payload.into(),
            timestamp: None,
        }
    }

    /// Attach a timestamp.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Create an ERROR message carrying a UTF-8 description.
    pub fn error(channel_id: impl Into<String>, txid: impl Into<String>, message: &str) -> Self {
        Self::new(
            MessageType::Error,
            channel_id,
            txid,
            Bytes::copy_from_slice(message.as_bytes()),
        )
    }

    /// Payload interpreted as UTF-8 text (lossy).
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Correlation key of this message.
    pub fn key(&self) -> crate::handler::TxKey {
        crate::handler::TxKey::new(&self.channel_id, &self.txid)
    }
}

/// Serialized body of a frame (everything but the type tag).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub channel_id: String,
    pub txid: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub timestamp: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_values() {
        for raw in 0u8..=32 {
            if let Some(ty) = MessageType::from_u8(raw) {
                assert_eq!(ty.as_u8(), raw);
            }
        }
        assert_eq!(MessageType::from_u8(12), None);
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::GetHistoryForKey.as_u8(), 19);
    }

    #[test]
    fn test_classification() {
        assert!(MessageType::Init.is_invocation());
        assert!(MessageType::Transaction.is_invocation());
        assert!(!MessageType::Response.is_invocation());

        assert!(MessageType::Response.is_reply());
        assert!(MessageType::Error.is_reply());
        assert!(!MessageType::Completed.is_reply());
    }

    #[test]
    fn test_error_message_payload_is_text() {
        let msg = ChaincodeMessage::error("ch", "tx1", "Wrong response1");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert_eq!(msg.payload_text(), "Wrong response1");
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_display_uses_peer_names() {
        assert_eq!(MessageType::QueryStateNext.to_string(), "QUERY_STATE_NEXT");
    }
}
