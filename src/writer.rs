//! Dedicated writer task for the outbound half of the peer stream.
//!
//! Every transaction task and the dispatcher send through a cloned
//! [`WriterHandle`]; one task owns the write half and drains an mpsc queue.
//! A frame is always written whole, so concurrent senders never interleave
//! partial messages.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher ──┐
//! Tx task 1  ──┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Tx task N  ──┘
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ShimError};
use crate::protocol::{encode_envelope, ChaincodeMessage, Header, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Encoded envelope.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Encode a message into a frame.
    pub fn from_message(msg: &ChaincodeMessage) -> Result<Self> {
        let envelope = encode_envelope(msg)?;
        let header = Header::new(msg.msg_type.as_u8(), envelope.len() as u32);
        Ok(Self::new(&header, Bytes::from(envelope)))
    }

    /// Total size of this frame (header + envelope).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending messages to the writer task.
///
/// Cheaply cloneable; one clone per transaction task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Pending frame count (for backpressure).
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Encode and send a message.
    ///
    /// Fails with [`ShimError::ConnectionClosed`] once the writer task has
    /// stopped.
    pub async fn send_message(&self, msg: &ChaincodeMessage) -> Result<()> {
        let frame = OutboundFrame::from_message(msg)?;
        tracing::trace!(
            msg_type = %msg.msg_type,
            channel_id = %msg.channel_id,
            tx_id = %msg.txid,
            size = frame.size(),
            "queue outbound message"
        );
        self.send(frame).await
    }

    /// Encode and queue a message without waiting.
    ///
    /// Used on the read path, which must never stall behind a full queue.
    pub fn try_send_message(&self, msg: &ChaincodeMessage) -> Result<()> {
        self.try_send(OutboundFrame::from_message(msg)?)
    }

    /// Try to send a frame without waiting for backpressure.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(ShimError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => ShimError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => ShimError::ConnectionClosed,
            }
        })
    }

    /// Send a frame to the writer task.
    ///
    /// Waits if backpressure is active, timing out after the configured
    /// duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            ShimError::ConnectionClosed
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(ShimError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task finishes when every handle is dropped or a write fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, pending).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "writer task stopped");
        }
        result
    });

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Dropping `rx` on error makes every later send fail with ConnectionClosed.
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;

        pending.fetch_sub(batch_size, Ordering::Release);
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ShimError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameBuffer, MessageType};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(payload: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(
            &Header::new(MessageType::Response.as_u8(), payload.len() as u32),
            Bytes::from_static(payload),
        )
    }

    #[test]
    fn test_outbound_frame_from_message() {
        let msg = ChaincodeMessage::new(MessageType::GetState, "ch", "tx", Bytes::new());
        let frame = OutboundFrame::from_message(&msg).unwrap();

        assert_eq!(frame.header[1], MessageType::GetState.as_u8());
        assert_eq!(frame.size(), HEADER_SIZE + frame.payload.len());
    }

    #[tokio::test]
    async fn test_send_message_arrives_decodable() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        let msg = ChaincodeMessage::new(MessageType::PutState, "ch", "tx9", b"payload".to_vec());
        handle.send_message(&msg).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = server.read(&mut buf).await.unwrap();

        let mut frames = FrameBuffer::new();
        let parsed = frames.push(&buf[..n]).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].to_message().unwrap().unwrap(), msg);
    }

    #[tokio::test]
    async fn test_send_after_writer_stops_is_connection_closed() {
        let (client, server) = duplex(64);
        drop(server);
        let (handle, task) = spawn_writer_task_default(client);

        // First write hits the broken pipe and stops the task.
        let _ = handle.send(frame(b"hello")).await;
        assert!(task.await.unwrap().is_err());

        let result = handle.send(frame(b"again")).await;
        assert!(matches!(result, Err(ShimError::ConnectionClosed)));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(4));
        let handle = WriterHandle::new(tx, pending, 4, Duration::from_secs(1));

        let msg = ChaincodeMessage::new(MessageType::Keepalive, "", "", Bytes::new());
        let result = handle.try_send_message(&msg);
        assert!(matches!(result, Err(ShimError::BackpressureTimeout)));
        assert_eq!(handle.pending_count(), 4);
    }

    #[tokio::test]
    async fn test_try_send_queues_below_capacity() {
        let (tx, mut rx) = mpsc::channel::<OutboundFrame>(10);
        let handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(0)), 4, Duration::from_secs(1));

        handle.try_send(frame(b"ping")).unwrap();
        assert_eq!(handle.pending_count(), 1);
        assert_eq!(&rx.recv().await.unwrap().payload[..], b"ping");

        drop(rx);
        let result = handle.try_send(frame(b"gone"));
        assert!(matches!(result, Err(ShimError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 1);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![frame(b"hello")];

        let slices = build_remaining_slices(&batch, 4);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 4);
        assert_eq!(slices[1].len(), 5);

        let slices = build_remaining_slices(&batch, HEADER_SIZE + 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| frame(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        assert!(task.await.unwrap().is_ok());
    }
}
