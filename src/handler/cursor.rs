//! Paginated query results.
//!
//! The peer answers a query with one page plus a cursor id. The iterator
//! yields the buffered records, asks for the next page with
//! QUERY_STATE_NEXT when the buffer runs dry and the peer reported more,
//! and releases the cursor with QUERY_STATE_CLOSE.

use std::collections::VecDeque;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_bytes::ByteBuf;

use super::context::ChaincodeStub;
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::{MessageType, QueryResponse, QueryStateNext};

/// Iterator over a server-side query cursor.
///
/// `T` is [`KeyValue`](crate::protocol::KeyValue) for range and rich
/// queries, [`KeyModification`](crate::protocol::KeyModification) for
/// history queries.
///
/// Dropping the iterator does not close the cursor; the shim closes any
/// cursor still open when the transaction finishes.
pub struct QueryIterator<'a, T> {
    stub: &'a ChaincodeStub,
    id: String,
    buffer: VecDeque<ByteBuf>,
    has_more: bool,
    closed: bool,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> QueryIterator<'a, T> {
    pub(crate) fn new(stub: &'a ChaincodeStub, page: QueryResponse) -> Self {
        Self {
            stub,
            id: page.id,
            buffer: page.results.into(),
            has_more: page.has_more,
            closed: false,
            _record: PhantomData,
        }
    }

    /// Next record, or `None` once the result set is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates failures of the QUERY_STATE_NEXT round trip and record
    /// decoding errors.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if self.closed {
            return Ok(None);
        }
        if self.buffer.is_empty() && self.has_more {
            self.fetch_next_page().await?;
        }
        match self.buffer.pop_front() {
            Some(raw) => Ok(Some(MsgPackCodec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Whether a call to [`next`](Self::next) may yield another record.
    pub fn has_next(&self) -> bool {
        !self.closed && (!self.buffer.is_empty() || self.has_more)
    }

    /// Drain the remaining records into a vector.
    pub async fn collect_all(&mut self) -> Result<Vec<T>> {
        let mut records = Vec::with_capacity(self.buffer.len());
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Release the cursor on the peer. Calling it again is a no-op.
    ///
    /// On error the iterator stays open and the cursor is still closed when
    /// the transaction finishes.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.stub.close_cursor(&self.id).await?;
        self.closed = true;
        self.buffer.clear();
        self.has_more = false;
        Ok(())
    }

    pub fn cursor_id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn fetch_next_page(&mut self) -> Result<()> {
        let payload = MsgPackCodec::encode(&QueryStateNext {
            id: self.id.clone(),
        })?;
        let reply = self.stub.call(MessageType::QueryStateNext, payload).await?;
        let page: QueryResponse = MsgPackCodec::decode(&reply)?;

        tracing::trace!(
            key = %self.stub.key(),
            cursor = %self.id,
            records = page.results.len(),
            has_more = page.has_more,
            "fetched next query page"
        );
        self.buffer.extend(page.results);
        self.has_more = page.has_more;
        Ok(())
    }
}
