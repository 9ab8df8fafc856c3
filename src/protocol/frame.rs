//! Frame struct and message (de)serialization.
//!
//! A [`Frame`] is a decoded header plus the raw envelope bytes. Turning it
//! into a [`ChaincodeMessage`] decodes the MsgPack envelope.
//!
//! # Example
//!
//! ```
//! use chaincode_shim::protocol::{encode_message, ChaincodeMessage, FrameBuffer, MessageType};
//!
//! let msg = ChaincodeMessage::new(MessageType::GetState, "ch", "tx1", b"k".to_vec());
//! let bytes = encode_message(&msg).unwrap();
//!
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//! let decoded = frames[0].to_message().unwrap().unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::Bytes;

use super::message::{ChaincodeMessage, Envelope, MessageType};
use super::wire_format::{Header, HEADER_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::{Result, ShimError};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Envelope bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and envelope bytes.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Known message type, if any.
    #[inline]
    pub fn msg_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.header.msg_type)
    }

    /// Decode the envelope into a message.
    ///
    /// Returns `Ok(None)` for frames whose type byte is not a known
    /// [`MessageType`]; callers skip those.
    pub fn to_message(&self) -> Result<Option<ChaincodeMessage>> {
        let Some(msg_type) = self.msg_type() else {
            return Ok(None);
        };
        let envelope: Envelope = MsgPackCodec::decode(&self.payload)?;
        Ok(Some(ChaincodeMessage {
            msg_type,
            channel_id: envelope.channel_id,
            txid: envelope.txid,
            payload: Bytes::from(envelope.payload),
            timestamp: envelope.timestamp,
        }))
    }
}

/// Encode the envelope of a message (the bytes after the header).
pub fn encode_envelope(msg: &ChaincodeMessage) -> Result<Vec<u8>> {
    let envelope = Envelope {
        channel_id: msg.channel_id.clone(),
        txid: msg.txid.clone(),
        payload: msg.payload.to_vec(),
        timestamp: msg.timestamp,
    };
    MsgPackCodec::encode(&envelope)
}

/// Encode a message as one contiguous frame (header + envelope).
pub fn encode_message(msg: &ChaincodeMessage) -> Result<Vec<u8>> {
    let envelope = encode_envelope(msg)?;
    let header = Header::new(msg.msg_type.as_u8(), envelope.len() as u32);

    let mut buf = Vec::with_capacity(HEADER_SIZE + envelope.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&envelope);
    Ok(buf)
}

/// Decode one complete frame held in `bytes` (used for nested messages).
///
/// # Errors
///
/// Fails when `bytes` is not exactly one well-formed frame of a known type.
pub fn decode_message(bytes: &[u8]) -> Result<ChaincodeMessage> {
    let header = Header::decode(bytes)
        .ok_or_else(|| ShimError::Protocol("nested message shorter than a header".to_string()))?;
    header.validate(u32::MAX)?;

    let body = &bytes[HEADER_SIZE..];
    if body.len() != header.payload_length as usize {
        return Err(ShimError::Protocol(format!(
            "nested message length {} does not match header {}",
            body.len(),
            header.payload_length
        )));
    }

    Frame::new(header, Bytes::copy_from_slice(body))
        .to_message()?
        .ok_or_else(|| {
            ShimError::Protocol(format!("nested message has unknown type {}", header.msg_type))
        })
}
