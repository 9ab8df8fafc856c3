//! Handler module - per-transaction state and the request/reply machinery.
//!
//! Provides:
//! - [`CorrelationTable`] - routes replies to the stub call waiting on a key
//! - [`RequestChannel`] - register, send, await: one stub round trip
//! - [`ChaincodeStub`] - the transaction context handed to the program
//! - [`QueryIterator`] - paginated query results with explicit close

mod context;
mod correlation;
mod cursor;

pub use context::ChaincodeStub;
pub use correlation::{short_txid, CorrelationTable, RequestChannel, TxKey, DEFAULT_REQUEST_TIMEOUT};
pub use cursor::QueryIterator;
