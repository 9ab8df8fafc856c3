//! Inbound half of the message channel.
//!
//! Exactly one task owns a [`MessageReader`]: the handshake first, then the
//! dispatcher loop.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, ShimError};
use crate::protocol::{ChaincodeMessage, Frame, FrameBuffer};

/// Read buffer size per syscall.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Decodes [`ChaincodeMessage`]s from the read half of the stream.
pub struct MessageReader<R> {
    reader: R,
    frames: FrameBuffer,
    ready: VecDeque<Frame>,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap a read half with the default envelope size limit.
    pub fn new(reader: R) -> Self {
        Self::with_frame_buffer(reader, FrameBuffer::new())
    }

    /// Wrap a read half with a custom envelope size limit.
    pub fn with_max_payload(reader: R, max_payload_size: u32) -> Self {
        Self::with_frame_buffer(reader, FrameBuffer::with_max_payload(max_payload_size))
    }

    fn with_frame_buffer(reader: R, frames: FrameBuffer) -> Self {
        Self {
            reader,
            frames,
            ready: VecDeque::new(),
            buf: vec![0u8; READ_BUFFER_SIZE],
            finished: false,
        }
    }

    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` exactly once when the stream ends; later calls
    /// fail with [`ShimError::ConnectionClosed`]. Frames with an unknown
    /// type or an undecodable envelope are skipped with a warning.
    pub async fn receive(&mut self) -> Result<Option<ChaincodeMessage>> {
        loop {
            while let Some(frame) = self.ready.pop_front() {
                match frame.to_message() {
                    Ok(Some(msg)) => return Ok(Some(msg)),
                    Ok(None) => {
                        tracing::warn!(
                            msg_type = frame.header.msg_type,
                            "discarding frame with unknown message type"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            msg_type = frame.header.msg_type,
                            error = %e,
                            "discarding frame with undecodable envelope"
                        );
                    }
                }
            }

            if self.finished {
                return Err(ShimError::ConnectionClosed);
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.finished = true;
                if !self.frames.is_empty() {
                    tracing::debug!(
                        buffered = self.frames.len(),
                        "stream ended inside a frame"
                    );
                }
                return Ok(None);
            }

            let frames = self.frames.push(&self.buf[..n])?;
            self.ready.extend(frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_message, Header, MessageType};
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_receive_in_order_then_end_once() {
        let (mut peer, shim) = duplex(4096);
        let mut reader = MessageReader::new(shim);

        let first = ChaincodeMessage::new(MessageType::Registered, "", "", Vec::new());
        let second = ChaincodeMessage::new(MessageType::Ready, "", "", Vec::new());
        let mut bytes = encode_message(&first).unwrap();
        bytes.extend(encode_message(&second).unwrap());
        peer.write_all(&bytes).await.unwrap();
        drop(peer);

        assert_eq!(reader.receive().await.unwrap(), Some(first));
        assert_eq!(reader.receive().await.unwrap(), Some(second));
        assert_eq!(reader.receive().await.unwrap(), None);
        assert!(matches!(
            reader.receive().await,
            Err(ShimError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_is_skipped() {
        let (mut peer, shim) = duplex(4096);
        let mut reader = MessageReader::new(shim);

        let mut bytes = Header::new(99, 0).encode().to_vec();
        let keepalive = ChaincodeMessage::new(MessageType::Keepalive, "", "", Vec::new());
        bytes.extend(encode_message(&keepalive).unwrap());
        peer.write_all(&bytes).await.unwrap();

        assert_eq!(reader.receive().await.unwrap(), Some(keepalive));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let (mut peer, shim) = duplex(4096);
        let mut reader = MessageReader::with_max_payload(shim, 16);

        peer.write_all(&Header::new(13, 1024).encode()).await.unwrap();

        assert!(matches!(reader.receive().await, Err(ShimError::Protocol(_))));
    }
}
