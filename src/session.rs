//! Session runtime: handshake, dispatcher loop and transaction tasks.
//!
//! [`Shim::start`] splits the stream, spawns the writer task, runs the
//! registration handshake and then hands the reader to the dispatcher loop.
//! The dispatcher is the only code that reads from the stream:
//!
//! - INIT / TRANSACTION spawn one task per `(channel_id, tx_id)`
//! - RESPONSE / ERROR are routed to the waiting stub call
//! - KEEPALIVE is echoed back
//!
//! # Example
//!
//! ```ignore
//! use chaincode_shim::ShimConfig;
//!
//! #[tokio::main]
//! async fn main() -> chaincode_shim::Result<()> {
//!     let config = ShimConfig::from_env()?;
//!     chaincode_shim::logging::init(&config.log_level, "INFO");
//!     chaincode_shim::start(config, MyChaincode).await
//! }
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chaincode::{Chaincode, EntryPoint};
use crate::codec::MsgPackCodec;
use crate::config::ShimConfig;
use crate::control::{register, SessionState};
use crate::error::{Result, ShimError};
use crate::handler::{ChaincodeStub, CorrelationTable, RequestChannel, TxKey};
use crate::protocol::{ChaincodeInput, ChaincodeMessage, MessageType, Response};
use crate::transport::{connect, MessageReader};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Connect to `config.peer_address`, register `chaincode` and serve until
/// the peer closes the stream.
pub async fn start<C: Chaincode>(config: ShimConfig, chaincode: C) -> Result<()> {
    config.validate()?;
    let stream = connect(&config.peer_address).await?;
    Shim::start(stream, config, chaincode)
        .await?
        .wait_for_shutdown()
        .await
}

/// Builder for a [`Shim`] session.
pub struct ShimBuilder {
    config: ShimConfig,
}

impl ShimBuilder {
    pub fn new(chaincode_id: impl Into<String>) -> Self {
        Self {
            config: ShimConfig::new(chaincode_id),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ShimConfig) -> Self {
        Self { config }
    }

    pub fn peer_address(mut self, address: impl Into<String>) -> Self {
        self.config.peer_address = address.into();
        self
    }

    /// Bound on each stub call's wait for a reply.
    ///
    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Bound on the REGISTER → READY handshake.
    ///
    /// Default: 30 seconds
    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.config.registration_timeout = timeout;
        self
    }

    /// Set the maximum pending outbound frames before senders wait.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Largest accepted inbound envelope.
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    /// Run the session over an already connected stream.
    pub async fn start<S, C>(self, stream: S, chaincode: C) -> Result<Shim>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        C: Chaincode,
    {
        Shim::start(stream, self.config, chaincode).await
    }

    /// Connect to the configured peer address and run the session.
    pub async fn connect<C: Chaincode>(self, chaincode: C) -> Result<Shim> {
        self.config.validate()?;
        let stream = connect(&self.config.peer_address).await?;
        Shim::start(stream, self.config, chaincode).await
    }
}

/// State shared by the dispatcher and every transaction task.
struct Session {
    chaincode: Arc<dyn Chaincode>,
    writer: WriterHandle,
    table: Arc<CorrelationTable>,
    requests: Arc<RequestChannel>,
    /// Keys of transactions that have not sent their terminal reply.
    active: Mutex<HashSet<TxKey>>,
    state: watch::Sender<SessionState>,
}

/// A registered, running session.
pub struct Shim {
    session: Arc<Session>,
    state_rx: watch::Receiver<SessionState>,
    dispatcher: JoinHandle<Result<()>>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Shim {
    pub fn builder(chaincode_id: impl Into<String>) -> ShimBuilder {
        ShimBuilder::new(chaincode_id)
    }

    /// Register with the peer over `stream` and start dispatching.
    ///
    /// Returns once the peer has answered READY.
    ///
    /// # Errors
    ///
    /// [`ShimError::Config`] for an invalid configuration,
    /// [`ShimError::RegistrationFailed`] when the handshake does not complete.
    pub async fn start<S, C>(stream: S, config: ShimConfig, chaincode: C) -> Result<Shim>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        C: Chaincode,
    {
        config.validate()?;

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());
        let mut reader = MessageReader::with_max_payload(read_half, config.max_payload_size);

        let (state_tx, state_rx) = watch::channel(SessionState::Unregistered);
        register(
            &mut reader,
            &writer,
            &config.chaincode_id,
            config.registration_timeout,
            &state_tx,
        )
        .await?;

        let table = Arc::new(CorrelationTable::new());
        let requests = Arc::new(RequestChannel::new(
            writer.clone(),
            table.clone(),
            config.request_timeout,
        ));
        let session = Arc::new(Session {
            chaincode: Arc::new(chaincode),
            writer,
            table,
            requests,
            active: Mutex::new(HashSet::new()),
            state: state_tx,
        });

        let dispatcher = tokio::spawn(session.clone().dispatch_loop(reader));

        Ok(Shim {
            session,
            state_rx,
            dispatcher,
            _writer_task: writer_task,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Transactions currently executing.
    pub fn active_transactions(&self) -> Vec<TxKey> {
        let mut keys: Vec<_> = self.session.active.lock().iter().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Transactions with a stub call waiting for its reply.
    pub fn pending_requests(&self) -> Vec<TxKey> {
        self.session.table.pending_keys()
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.session.writer.is_backpressure_active()
    }

    pub fn pending_frames(&self) -> usize {
        self.session.writer.pending_count()
    }

    /// Wait until the session reaches SHUTDOWN without consuming the handle.
    pub async fn shutdown_signal(&self) {
        let mut state_rx = self.state_rx.clone();
        // Err means the session was dropped, which is shutdown as well.
        let _ = state_rx.wait_for(|state| state.is_shutdown()).await;
    }

    /// Wait for the dispatcher loop to end.
    ///
    /// Returns the error that ended the loop, or `Ok` when the peer closed
    /// the stream.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        match self.dispatcher.await {
            Ok(result) => result,
            Err(e) => Err(ShimError::Io(std::io::Error::other(e))),
        }
    }
}

impl Session {
    async fn dispatch_loop<R>(self: Arc<Self>, mut reader: MessageReader<R>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let result = loop {
            match reader.receive().await {
                Ok(Some(msg)) => self.dispatch(msg),
                Ok(None) => {
                    tracing::info!("peer closed the stream");
                    break Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "read loop failed");
                    break Err(e);
                }
            }
        };
        self.shutdown();
        result
    }

    fn dispatch(self: &Arc<Self>, msg: ChaincodeMessage) {
        match msg.msg_type {
            MessageType::Init | MessageType::Transaction => self.spawn_transaction(msg),
            ty if ty.is_reply() => {
                if let Err(msg) = self.table.deliver(msg) {
                    tracing::warn!(
                        key = %msg.key(),
                        msg_type = %msg.msg_type,
                        "no pending request for reply; discarding"
                    );
                }
            }
            MessageType::Keepalive => {
                if let Err(e) = self.writer.try_send_message(&msg) {
                    tracing::warn!(error = %e, "failed to echo KEEPALIVE");
                }
            }
            other => {
                tracing::warn!(key = %msg.key(), msg_type = %other, "unexpected message; discarding");
            }
        }
    }

    fn spawn_transaction(self: &Arc<Self>, msg: ChaincodeMessage) {
        let key = msg.key();
        if !self.active.lock().insert(key.clone()) {
            tracing::warn!(
                key = %key,
                msg_type = %msg.msg_type,
                "transaction already active; discarding duplicate"
            );
            return;
        }

        tracing::debug!(key = %key, msg_type = %msg.msg_type, "starting transaction");
        let session = self.clone();
        tokio::spawn(async move { session.run_transaction(key, msg).await });
    }

    async fn run_transaction(self: Arc<Self>, key: TxKey, msg: ChaincodeMessage) {
        let entry = match msg.msg_type {
            MessageType::Init => EntryPoint::Init,
            _ => EntryPoint::Invoke,
        };

        let outcome = match decode_input(&msg.payload) {
            Ok(input) => self.execute(&key, entry, input, &msg).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable chaincode input");
                Err(ShimError::Program(format!(
                    "failed to decode chaincode input: {e}"
                )))
            }
        };
        let response = outcome.unwrap_or_else(|e| match e {
            ShimError::Program(message) => Response::error(message),
            other => Response::error(other.to_string()),
        });

        let reply = terminal_message(&key, &response);
        tracing::debug!(
            key = %key,
            msg_type = %reply.msg_type,
            status = response.status,
            "transaction finished"
        );
        if let Err(e) = self.writer.send_message(&reply).await {
            tracing::error!(key = %key, error = %e, "failed to send terminal reply");
        }

        // Released only once the terminal reply is queued; a duplicate
        // arriving before then is discarded.
        self.active.lock().remove(&key);
    }

    async fn execute(
        &self,
        key: &TxKey,
        entry: EntryPoint,
        input: ChaincodeInput,
        msg: &ChaincodeMessage,
    ) -> Result<Response> {
        let args = input
            .args
            .into_iter()
            .map(|arg| Bytes::from(arg.into_vec()))
            .collect();
        let stub = ChaincodeStub::new(key.clone(), args, msg.timestamp, self.requests.clone());

        let outcome = AssertUnwindSafe(entry.call(self.chaincode.as_ref(), &stub))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(response) => {
                if !response.is_success() {
                    tracing::warn!(
                        key = %key,
                        entry = entry.name(),
                        status = response.status,
                        message = %response.message,
                        "chaincode returned an error response"
                    );
                }
                Ok(response)
            }
            Err(panic) => {
                let reason = panic_message(&*panic);
                tracing::error!(key = %key, entry = entry.name(), panic = %reason, "chaincode panicked");
                Err(ShimError::Program(format!("chaincode panicked: {reason}")))
            }
        };

        let closed = stub.close_open_cursors().await;
        if closed > 0 {
            tracing::debug!(key = %key, closed, "closed cursors at transaction end");
        }
        result
    }

    fn shutdown(&self) {
        self.state.send_replace(SessionState::Shutdown);
        let cancelled = self.table.close();
        tracing::info!(
            cancelled,
            active = self.active.lock().len(),
            "session shut down"
        );
    }
}

fn decode_input(payload: &[u8]) -> Result<ChaincodeInput> {
    if payload.is_empty() {
        return Ok(ChaincodeInput::default());
    }
    MsgPackCodec::decode(payload)
}

/// COMPLETED carrying the encoded [`Response`] below the error threshold,
/// ERROR carrying its message otherwise.
fn terminal_message(key: &TxKey, response: &Response) -> ChaincodeMessage {
    if response.status >= Response::ERROR_THRESHOLD {
        return ChaincodeMessage::error(&key.channel_id, &key.tx_id, &response.message);
    }
    match MsgPackCodec::encode(response) {
        Ok(payload) => {
            ChaincodeMessage::new(MessageType::Completed, &key.channel_id, &key.tx_id, payload)
        }
        Err(e) => ChaincodeMessage::error(
            &key.channel_id,
            &key.tx_id,
            &format!("failed to encode response: {e}"),
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
