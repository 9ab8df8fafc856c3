//! Transaction context exposed to the chaincode as its stub.
//!
//! One [`ChaincodeStub`] exists per INIT/TRANSACTION. Every ledger operation
//! is a round trip through the shared [`RequestChannel`], tagged with this
//! transaction's `(channel_id, tx_id)`.
//!
//! # Example
//!
//! ```ignore
//! async fn transfer(stub: &ChaincodeStub) -> Result<()> {
//!     let params = stub.parameters();
//!     let balance = stub.get_string_state(&params[0]).await?;
//!     stub.put_state(&params[0], b"120").await?;
//!     stub.del_state("delKey").await
//! }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::correlation::{RequestChannel, TxKey};
use super::cursor::QueryIterator;
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::{
    decode_message, ChaincodeId, ChaincodeInput, ChaincodeSpec, DelState, GetHistoryForKey,
    GetQueryResult, GetState, GetStateByRange, KeyModification, KeyValue, MessageType, PutState,
    QueryResponse, QueryStateClose, Response, Timestamp,
};

/// Start key sent for an open-ended range (`""` would mean "no start").
const MIN_UNICODE_RUNE_VALUE: &str = "\u{1}";

/// Per-transaction stub handed to [`Chaincode::init`](crate::Chaincode::init)
/// and [`Chaincode::invoke`](crate::Chaincode::invoke).
///
/// Only one ledger call may be outstanding at a time; overlapping calls
/// fail with [`ShimError::ConcurrentCallNotAllowed`](crate::ShimError::ConcurrentCallNotAllowed).
pub struct ChaincodeStub {
    key: TxKey,
    args: Vec<Bytes>,
    timestamp: Option<Timestamp>,
    requests: Arc<RequestChannel>,
    /// Cursor ids opened by this transaction and not closed yet.
    cursors: Mutex<BTreeSet<String>>,
}

impl ChaincodeStub {
    pub(crate) fn new(
        key: TxKey,
        args: Vec<Bytes>,
        timestamp: Option<Timestamp>,
        requests: Arc<RequestChannel>,
    ) -> Self {
        Self {
            key,
            args,
            timestamp,
            requests,
            cursors: Mutex::new(BTreeSet::new()),
        }
    }

    #[inline]
    pub fn channel_id(&self) -> &str {
        &self.key.channel_id
    }

    #[inline]
    pub fn tx_id(&self) -> &str {
        &self.key.tx_id
    }

    /// Correlation key of this transaction.
    #[inline]
    pub fn key(&self) -> &TxKey {
        &self.key
    }

    /// Timestamp of the invocation message, if the peer sent one.
    pub fn tx_timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Raw invocation arguments, function name first.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Arguments as UTF-8 strings (lossy).
    pub fn string_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    /// First argument, or `""` when there are none.
    pub fn function(&self) -> String {
        self.string_args().into_iter().next().unwrap_or_default()
    }

    /// Every argument after the function name.
    pub fn parameters(&self) -> Vec<String> {
        self.string_args().into_iter().skip(1).collect()
    }

    /// Read `key`. An absent key yields empty bytes.
    pub async fn get_state(&self, key: &str) -> Result<Bytes> {
        let payload = MsgPackCodec::encode(&GetState {
            key: key.to_string(),
        })?;
        self.call(MessageType::GetState, payload).await
    }

    /// Read `key` as UTF-8 text (lossy).
    pub async fn get_string_state(&self, key: &str) -> Result<String> {
        let value = self.get_state(key).await?;
        Ok(String::from_utf8_lossy(&value).into_owned())
    }

    /// Write `value` under `key`.
    pub async fn put_state(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        let payload = MsgPackCodec::encode(&PutState {
            key: key.to_string(),
            value: value.as_ref().to_vec(),
        })?;
        self.call(MessageType::PutState, payload).await?;
        Ok(())
    }

    /// Write a UTF-8 string under `key`.
    pub async fn put_string_state(&self, key: &str, value: &str) -> Result<()> {
        self.put_state(key, value.as_bytes()).await
    }

    /// Delete `key`.
    pub async fn del_state(&self, key: &str) -> Result<()> {
        let payload = MsgPackCodec::encode(&DelState {
            key: key.to_string(),
        })?;
        self.call(MessageType::DelState, payload).await?;
        Ok(())
    }

    /// Iterate keys in `[start_key, end_key)`. An empty `start_key` means
    /// "from the first key", an empty `end_key` "to the last key".
    pub async fn get_state_by_range(
        &self,
        start_key: &str,
        end_key: &str,
    ) -> Result<QueryIterator<'_, KeyValue>> {
        let start_key = if start_key.is_empty() {
            MIN_UNICODE_RUNE_VALUE
        } else {
            start_key
        };
        let payload = MsgPackCodec::encode(&GetStateByRange {
            start_key: start_key.to_string(),
            end_key: end_key.to_string(),
        })?;
        self.open_query(MessageType::GetStateByRange, payload).await
    }

    /// Run a rich query understood by the peer's state database.
    pub async fn get_query_result(&self, query: &str) -> Result<QueryIterator<'_, KeyValue>> {
        let payload = MsgPackCodec::encode(&GetQueryResult {
            query: query.to_string(),
        })?;
        self.open_query(MessageType::GetQueryResult, payload).await
    }

    /// Iterate the committed modifications of `key`.
    pub async fn get_history_for_key(
        &self,
        key: &str,
    ) -> Result<QueryIterator<'_, KeyModification>> {
        let payload = MsgPackCodec::encode(&GetHistoryForKey {
            key: key.to_string(),
        })?;
        self.open_query(MessageType::GetHistoryForKey, payload).await
    }

    /// Call another chaincode on this channel (or on `channel`).
    ///
    /// The called chaincode's failure comes back as an error [`Response`],
    /// not as `Err`; `Err` is reserved for shim and transport failures.
    pub async fn invoke_chaincode<I, A>(
        &self,
        chaincode_name: &str,
        args: I,
        channel: Option<&str>,
    ) -> Result<Response>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let name = match channel.map(str::trim) {
            Some(channel) if !channel.is_empty() => format!("{chaincode_name}/{channel}"),
            _ => chaincode_name.to_string(),
        };
        let payload = MsgPackCodec::encode(&ChaincodeSpec {
            chaincode_id: ChaincodeId { name },
            input: ChaincodeInput::from_args(args),
        })?;

        let reply = self.call(MessageType::InvokeChaincode, payload).await?;
        let nested = decode_message(&reply)?;
        match nested.msg_type {
            MessageType::Completed => MsgPackCodec::decode(&nested.payload),
            _ => Ok(Response::error(nested.payload_text())),
        }
    }

    /// Cursor ids this transaction still holds open.
    pub fn open_cursors(&self) -> Vec<String> {
        self.cursors.lock().iter().cloned().collect()
    }

    async fn open_query<T>(&self, msg_type: MessageType, payload: Vec<u8>) -> Result<QueryIterator<'_, T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let reply = self.call(msg_type, payload).await?;
        let page: QueryResponse = MsgPackCodec::decode(&reply)?;
        // No id means the peer kept no iterator for this query.
        if !page.id.is_empty() {
            self.track_cursor(&page.id);
        }
        tracing::debug!(
            key = %self.key,
            cursor = %page.id,
            records = page.results.len(),
            has_more = page.has_more,
            "opened query cursor"
        );
        Ok(QueryIterator::new(self, page))
    }

    pub(crate) fn track_cursor(&self, cursor_id: &str) {
        self.cursors.lock().insert(cursor_id.to_string());
    }

    pub(crate) async fn call(&self, msg_type: MessageType, payload: Vec<u8>) -> Result<Bytes> {
        self.requests.call(&self.key, msg_type, payload).await
    }

    /// Close `cursor_id` on the peer if this transaction still owns it.
    ///
    /// Returns `Ok(false)` when it was already closed. The id stays owned
    /// until the peer confirms the close, so a failed close is retried at
    /// teardown.
    pub(crate) async fn close_cursor(&self, cursor_id: &str) -> Result<bool> {
        if !self.cursors.lock().contains(cursor_id) {
            return Ok(false);
        }
        let payload = MsgPackCodec::encode(&QueryStateClose {
            id: cursor_id.to_string(),
        })?;
        self.call(MessageType::QueryStateClose, payload).await?;
        if !self.cursors.lock().remove(cursor_id) {
            return Ok(false);
        }
        tracing::debug!(key = %self.key, cursor = cursor_id, "closed query cursor");
        Ok(true)
    }

    /// Close every cursor the chaincode left open. Failures are logged.
    pub(crate) async fn close_open_cursors(&self) -> usize {
        let leftover = self.open_cursors();
        let mut closed = 0;
        for id in leftover {
            tracing::debug!(key = %self.key, cursor = %id, "closing cursor left open by chaincode");
            match self.close_cursor(&id).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(key = %self.key, cursor = %id, error = %e, "failed to close cursor");
                }
            }
        }
        closed
    }
}
