//! # chaincode-shim
//!
//! Runtime that connects a chaincode (a transaction program) to a ledger
//! peer over one long-lived duplex stream.
//!
//! The peer sends INIT and TRANSACTION messages; each runs as its own task
//! calling [`Chaincode::init`] or [`Chaincode::invoke`]. Inside, the program
//! talks to the ledger through a [`ChaincodeStub`] whose calls look
//! synchronous but are multiplexed over the shared stream and matched to
//! their replies by `(channel_id, tx_id)`.
//!
//! ## Architecture
//!
//! - **Control** (`control`): REGISTER → REGISTERED → READY handshake
//! - **Dispatcher** (`session`): single reader, one task per transaction
//! - **Handler** (`handler`): correlation table, stub, query cursors
//! - **Wire** (`protocol`, `writer`, `transport`): framed MsgPack messages
//!
//! ## Example
//!
//! ```ignore
//! use chaincode_shim::{BoxFuture, Chaincode, ChaincodeStub, Response, ShimConfig};
//!
//! struct Echo;
//!
//! impl Chaincode for Echo {
//!     fn init<'a>(&'a self, _stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
//!         Box::pin(async { Response::success() })
//!     }
//!
//!     fn invoke<'a>(&'a self, stub: &'a ChaincodeStub) -> BoxFuture<'a, Response> {
//!         Box::pin(async move { Response::success_with_payload("", stub.function()) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> chaincode_shim::Result<()> {
//!     let config = ShimConfig::from_env()?;
//!     chaincode_shim::logging::init(&config.log_level, "INFO");
//!     chaincode_shim::start(config, Echo).await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod logging;
pub mod protocol;
pub mod transport;
pub mod writer;

mod chaincode;
mod session;

pub use chaincode::{BoxFuture, Chaincode};
pub use config::ShimConfig;
pub use control::SessionState;
pub use error::{Result, ShimError};
pub use handler::{ChaincodeStub, QueryIterator, TxKey};
pub use protocol::{KeyModification, KeyValue, Response};
pub use session::{start, Shim, ShimBuilder};
