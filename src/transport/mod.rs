//! Transport module - the message channel over the peer stream.
//!
//! Provides:
//! - [`connect`] - open a TCP stream to the peer
//! - [`MessageReader`] - the single inbound message source
//! - [`WriterHandle`](crate::writer::WriterHandle) - concurrent-safe outbound side
//!
//! Any `AsyncRead + AsyncWrite` stream works; tests use `tokio::io::duplex`.

mod reader;
mod tcp;

pub use reader::MessageReader;
pub use tcp::connect;
