//! Correlation of stub calls with their replies.
//!
//! A transaction's program logic is sequential, so the correlation key is
//! simply the transaction's `(channel_id, tx_id)` pair: at most one stub
//! call per key is in flight. The dispatcher loop is the only code that
//! fulfils entries; the calling task owns removal on timeout or failure.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, ShimError};
use crate::protocol::{ChaincodeMessage, MessageType};
use crate::writer::WriterHandle;

/// Default bound on how long a stub call waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `(channel_id, tx_id)` pair identifying a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxKey {
    pub channel_id: String,
    pub tx_id: String,
}

impl TxKey {
    pub fn new(channel_id: impl Into<String>, tx_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            tx_id: tx_id.into(),
        }
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.channel_id, short_txid(&self.tx_id))
    }
}

/// First 8 characters of a transaction id, for log lines.
pub fn short_txid(tx_id: &str) -> &str {
    match tx_id.char_indices().nth(8) {
        Some((idx, _)) => &tx_id[..idx],
        None => tx_id,
    }
}

#[derive(Default)]
struct Waiters {
    by_key: HashMap<TxKey, oneshot::Sender<ChaincodeMessage>>,
    closed: bool,
}

/// Maps a transaction key to the stub call waiting for its reply.
///
/// The lock covers only the map, never a send or an await.
#[derive(Default)]
pub struct CorrelationTable {
    waiters: Mutex<Waiters>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `key`.
    ///
    /// # Errors
    ///
    /// - [`ShimError::ConcurrentCallNotAllowed`] if a call for `key` is
    ///   already outstanding
    /// - [`ShimError::StreamClosed`] after [`close`](Self::close)
    pub fn register(&self, key: &TxKey) -> Result<oneshot::Receiver<ChaincodeMessage>> {
        let mut waiters = self.waiters.lock();
        if waiters.closed {
            return Err(ShimError::StreamClosed);
        }
        if waiters.by_key.contains_key(key) {
            return Err(ShimError::ConcurrentCallNotAllowed {
                channel_id: key.channel_id.clone(),
                tx_id: key.tx_id.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        waiters.by_key.insert(key.clone(), tx);
        tracing::trace!(key = %key, pending = waiters.by_key.len(), "registered pending request");
        Ok(rx)
    }

    /// Hand a reply to whoever waits on its key.
    ///
    /// Gives the message back when nobody is waiting (never registered,
    /// timed out, or the caller went away).
    pub fn deliver(&self, msg: ChaincodeMessage) -> std::result::Result<(), ChaincodeMessage> {
        let waiter = self.waiters.lock().by_key.remove(&msg.key());
        match waiter {
            Some(tx) => tx.send(msg),
            None => Err(msg),
        }
    }

    /// Drop the waiter for `key`. Returns whether one existed.
    pub fn cancel(&self, key: &TxKey) -> bool {
        self.waiters.lock().by_key.remove(key).is_some()
    }

    /// Fail every waiter and refuse new registrations.
    ///
    /// Returns how many waiters were cancelled.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut waiters = self.waiters.lock();
            waiters.closed = true;
            waiters.by_key.drain().collect()
        };
        // Dropping the senders wakes the receivers with RecvError.
        let count = drained.len();
        drop(drained);
        count
    }

    /// Keys with an outstanding call.
    pub fn pending_keys(&self) -> Vec<TxKey> {
        let mut keys: Vec<_> = self.waiters.lock().by_key.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.waiters.lock().closed
    }
}

/// Removes a table entry unless disarmed (timeout, send failure, drop).
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    key: &'a TxKey,
    active: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.active = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.active && self.table.cancel(self.key) {
            tracing::debug!(key = %self.key, "stub call abandoned: removed pending request");
        }
    }
}

/// The synchronous round trip shared by every stub operation: register,
/// send, wait for the reply.
pub struct RequestChannel {
    writer: WriterHandle,
    table: std::sync::Arc<CorrelationTable>,
    request_timeout: Duration,
}

impl RequestChannel {
    pub fn new(
        writer: WriterHandle,
        table: std::sync::Arc<CorrelationTable>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            writer,
            table,
            request_timeout,
        }
    }

    /// Send `msg_type` with `payload` for `key` and wait for the reply.
    ///
    /// Returns the RESPONSE payload.
    ///
    /// # Errors
    ///
    /// - [`ShimError::ConcurrentCallNotAllowed`] when a call for `key` is outstanding
    /// - [`ShimError::RequestTimeout`] when no reply arrives in time
    /// - [`ShimError::StreamClosed`] when the session shuts down while waiting
    /// - [`ShimError::Peer`] when the peer replies with ERROR
    pub async fn call(&self, key: &TxKey, msg_type: MessageType, payload: Vec<u8>) -> Result<Bytes> {
        let rx = self.table.register(key)?;
        let mut guard = PendingGuard {
            table: &self.table,
            key,
            active: true,
        };

        let request = ChaincodeMessage::new(msg_type, &key.channel_id, &key.tx_id, payload);
        self.writer.send_message(&request).await?;
        tracing::debug!(key = %key, %msg_type, "request sent, awaiting reply");

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                tracing::debug!(key = %key, %msg_type, "session closed while waiting for reply");
                return Err(ShimError::StreamClosed);
            }
            Err(_elapsed) => {
                tracing::warn!(
                    key = %key,
                    %msg_type,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "no reply within timeout"
                );
                return Err(ShimError::RequestTimeout);
            }
        };
        guard.disarm();

        match reply.msg_type {
            MessageType::Response => {
                tracing::debug!(key = %key, %msg_type, "received RESPONSE");
                Ok(reply.payload)
            }
            MessageType::Error => {
                let message = reply.payload_text();
                tracing::debug!(key = %key, %msg_type, error = %message, "received ERROR");
                Err(ShimError::Peer(message))
            }
            other => Err(ShimError::Protocol(format!(
                "unexpected {other} in reply to {msg_type}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(channel: &str, tx: &str) -> ChaincodeMessage {
        ChaincodeMessage::new(MessageType::Response, channel, tx, b"ok".to_vec())
    }

    #[tokio::test]
    async fn test_deliver_to_registered_waiter() {
        let table = CorrelationTable::new();
        let key = TxKey::new("ch", "tx1");

        let rx = table.register(&key).unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.deliver(reply("ch", "tx1")).is_ok());
        assert!(table.is_empty());
        assert_eq!(&rx.await.unwrap().payload[..], b"ok");
    }

    #[test]
    fn test_second_registration_is_rejected() {
        let table = CorrelationTable::new();
        let key = TxKey::new("ch", "tx1");

        let _rx = table.register(&key).unwrap();
        let err = table.register(&key).unwrap_err();

        assert!(matches!(err, ShimError::ConcurrentCallNotAllowed { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_same_tx_on_other_channel_is_independent() {
        let table = CorrelationTable::new();
        let _a = table.register(&TxKey::new("ch1", "tx")).unwrap();
        let _b = table.register(&TxKey::new("ch2", "tx")).unwrap();

        assert_eq!(
            table.pending_keys(),
            vec![TxKey::new("ch1", "tx"), TxKey::new("ch2", "tx")]
        );
    }

    #[test]
    fn test_deliver_without_waiter_returns_message() {
        let table = CorrelationTable::new();
        let back = table.deliver(reply("ch", "nobody")).unwrap_err();
        assert_eq!(back.txid, "nobody");
    }

    #[test]
    fn test_deliver_after_receiver_dropped_returns_message() {
        let table = CorrelationTable::new();
        let rx = table.register(&TxKey::new("ch", "tx1")).unwrap();
        drop(rx);

        assert!(table.deliver(reply("ch", "tx1")).is_err());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_new_registrations() {
        let table = CorrelationTable::new();
        let rx1 = table.register(&TxKey::new("ch", "a")).unwrap();
        let rx2 = table.register(&TxKey::new("ch", "b")).unwrap();

        assert_eq!(table.close(), 2);
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
        assert!(table.is_closed());
        assert!(matches!(
            table.register(&TxKey::new("ch", "c")),
            Err(ShimError::StreamClosed)
        ));
    }

    #[test]
    fn test_short_txid() {
        assert_eq!(short_txid("0123456789abcdef"), "01234567");
        assert_eq!(short_txid("0"), "0");
        assert_eq!(TxKey::new("testChannel", "0").to_string(), "[testChannel] 0");
    }
}
