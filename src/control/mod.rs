//! Control plane - session lifecycle and the registration handshake.
//!
//! The handshake runs on the same stream as everything else, before the
//! dispatcher takes over the reader.
//!
//! # Workflow
//!
//! 1. Shim sends REGISTER with its chaincode id
//! 2. Peer answers REGISTERED
//! 3. Peer answers READY
//! 4. Dispatcher starts executing INIT/TRANSACTION messages

mod register;
mod state;

pub use register::{register, register_message};
pub use state::SessionState;
