//! Error types for chaincode-shim.

use thiserror::Error;

/// Main error type for all shim operations.
#[derive(Debug, Error)]
pub enum ShimError {
    /// I/O error on the peer stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol violation (bad frame, unexpected message, duplicate transaction, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer rejected the handshake or it could not complete.
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// The outbound side of the stream is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A pending stub call was cancelled because the session shut down.
    #[error("Stream closed while waiting for a reply")]
    StreamClosed,

    /// No reply arrived within the configured bound.
    #[error("Request timed out")]
    RequestTimeout,

    /// The program issued a stub call while another one was still outstanding.
    #[error("Concurrent stub call not allowed for channel {channel_id} transaction {tx_id}")]
    ConcurrentCallNotAllowed {
        /// Channel of the offending transaction.
        channel_id: String,
        /// Transaction id of the offending transaction.
        tx_id: String,
    },

    /// The peer answered a stub call with ERROR.
    #[error("Peer error: {0}")]
    Peer(String),

    /// The chaincode failed (panic or undecodable input). Reported to the
    /// peer as ERROR.
    #[error("Chaincode error: {0}")]
    Program(String),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using ShimError.
pub type Result<T> = std::result::Result<T, ShimError>;
