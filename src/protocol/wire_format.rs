//! Wire format encoding and decoding.
//!
//! Every message on the peer stream is one frame with a 6-byte header:
//! ```text
//! ┌─────────┬──────────┬──────────┐
//! │ Version │ Msg Type │ Length   │
//! │ 1 byte  │ 1 byte   │ 4 bytes  │
//! │         │          │ uint32 BE│
//! └─────────┴──────────┴──────────┘
//! ```
//!
//! The header is followed by `Length` bytes of MsgPack-encoded envelope.

use crate::error::{Result, ShimError};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Wire protocol version carried in every header.
pub const WIRE_VERSION: u8 = 1;

/// Default maximum envelope size (100 MB, the peer's default gRPC limit).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 100 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Wire protocol version.
    pub version: u8,
    /// Raw message type (see [`MessageType`](super::MessageType)).
    pub msg_type: u8,
    /// Envelope length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a header for the current wire version.
    pub fn new(msg_type: u8, payload_length: u32) -> Self {
        Self {
            version: WIRE_VERSION,
            msg_type,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian length).
    ///
    /// # Example
    ///
    /// ```
    /// use chaincode_shim::protocol::Header;
    ///
    /// let header = Header::new(8, 100);
    /// assert_eq!(header.encode(), [1, 8, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.msg_type;
        buf[2..6].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            msg_type: buf[1],
            payload_length: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks the version byte and the envelope size limit. Unknown message
    /// types are not rejected here; the reader skips them.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.version != WIRE_VERSION {
            return Err(ShimError::Protocol(format!(
                "Unsupported wire version {} (expected {})",
                self.version, WIRE_VERSION
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(ShimError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }
}
