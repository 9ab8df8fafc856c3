//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the peer stream protocol:
//! - 6-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - [`ChaincodeMessage`] and the typed payloads it carries

mod frame;
mod frame_buffer;
mod message;
pub mod payload;
mod wire_format;

pub(crate) use frame::encode_envelope;
pub use frame::{decode_message, encode_message, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{ChaincodeMessage, MessageType, Timestamp};
pub use payload::{
    ChaincodeId, ChaincodeInput, ChaincodeSpec, DelState, GetHistoryForKey, GetQueryResult,
    GetState, GetStateByRange, KeyModification, KeyValue, PutState, QueryResponse,
    QueryStateClose, QueryStateNext, Response,
};
pub use wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, WIRE_VERSION};
