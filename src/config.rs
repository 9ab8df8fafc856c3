//! Session configuration.
//!
//! A [`ShimConfig`] is passed explicitly to the session; nothing in the core
//! reads the environment. [`ShimConfig::from_env`] is the conventional way a
//! chaincode process picks up what the peer launched it with.

use std::time::Duration;

use crate::error::{Result, ShimError};
use crate::handler::DEFAULT_REQUEST_TIMEOUT;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::WriterConfig;

/// Peer listener used when `CORE_PEER_ADDRESS` is unset.
pub const DEFAULT_PEER_ADDRESS: &str = "127.0.0.1:7052";

/// Default bound on the REGISTER → READY handshake.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default shim log level name.
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

pub const ENV_PEER_ADDRESS: &str = "CORE_PEER_ADDRESS";
pub const ENV_CHAINCODE_ID_NAME: &str = "CORE_CHAINCODE_ID_NAME";
pub const ENV_LOGGING_SHIM: &str = "CORE_CHAINCODE_LOGGING_SHIM";
pub const ENV_LOGGING_LEVEL: &str = "CORE_CHAINCODE_LOGGING_LEVEL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "CORE_CHAINCODE_REQUEST_TIMEOUT_MS";

/// Everything a session needs besides the stream and the program.
#[derive(Debug, Clone)]
pub struct ShimConfig {
    /// `host:port` of the peer's chaincode listener.
    pub peer_address: String,
    /// Name this chaincode registers under.
    pub chaincode_id: String,
    /// Shim log level name (CRITICAL, ERROR, WARNING, NOTICE, INFO, DEBUG).
    pub log_level: String,
    /// Bound on each stub call's wait for its reply.
    pub request_timeout: Duration,
    /// Bound on the registration handshake.
    pub registration_timeout: Duration,
    /// Outbound queue settings.
    pub writer: WriterConfig,
    /// Largest accepted inbound envelope, in bytes.
    pub max_payload_size: u32,
}

impl ShimConfig {
    pub fn new(chaincode_id: impl Into<String>) -> Self {
        Self {
            peer_address: DEFAULT_PEER_ADDRESS.to_string(),
            chaincode_id: chaincode_id.into(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            writer: WriterConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// [`ShimError::Config`] when `CORE_CHAINCODE_ID_NAME` is missing or a
    /// numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let chaincode_id = non_empty(ENV_CHAINCODE_ID_NAME)
            .ok_or_else(|| ShimError::Config(format!("{ENV_CHAINCODE_ID_NAME} is not set")))?;
        let mut config = Self::new(chaincode_id);

        if let Some(address) = non_empty(ENV_PEER_ADDRESS) {
            config.peer_address = address;
        }
        if let Some(level) = non_empty(ENV_LOGGING_SHIM).or_else(|| non_empty(ENV_LOGGING_LEVEL)) {
            config.log_level = level;
        }
        if let Some(ms) = non_empty(ENV_REQUEST_TIMEOUT_MS) {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                ShimError::Config(format!("{ENV_REQUEST_TIMEOUT_MS} is not a number: {ms}"))
            })?;
            config.request_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn peer_address(mut self, address: impl Into<String>) -> Self {
        self.peer_address = address.into();
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    pub fn writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }

    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chaincode_id.trim().is_empty() {
            return Err(ShimError::Config("chaincode id is empty".to_string()));
        }
        if self.request_timeout.is_zero() || self.registration_timeout.is_zero() {
            return Err(ShimError::Config("timeouts must be non-zero".to_string()));
        }
        if self.writer.channel_capacity == 0 {
            return Err(ShimError::Config("writer channel capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}
