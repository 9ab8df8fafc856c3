//! Codec module - MsgPack serialization for envelopes and payloads.
//!
//! The shim encodes every envelope and typed payload with [`MsgPackCodec`].
//! Codecs are marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use chaincode_shim::codec::MsgPackCodec;
//! use chaincode_shim::protocol::GetState;
//!
//! let encoded = MsgPackCodec::encode(&GetState { key: "a".into() }).unwrap();
//! let decoded: GetState = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded.key, "a");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
