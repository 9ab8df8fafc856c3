//! Registration handshake.
//!
//! The shim announces itself with REGISTER and waits for the peer to answer
//! REGISTERED and then READY. Only after READY does the dispatcher start
//! executing invocations.
//!
//! ```text
//! shim                         peer
//!  │ ── REGISTER{name} ──────► │
//!  │ ◄────────── REGISTERED ── │
//!  │ ◄─────────────── READY ── │
//!  │ ◄──── INIT / TRANSACTION  │
//! ```

use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::watch;

use super::SessionState;
use crate::codec::MsgPackCodec;
use crate::error::{Result, ShimError};
use crate::protocol::{ChaincodeId, ChaincodeMessage, MessageType};
use crate::transport::MessageReader;
use crate::writer::WriterHandle;

/// Build the REGISTER message for `chaincode_id`.
pub fn register_message(chaincode_id: &str) -> Result<ChaincodeMessage> {
    let payload = MsgPackCodec::encode(&ChaincodeId {
        name: chaincode_id.to_string(),
    })?;
    Ok(ChaincodeMessage::new(MessageType::Register, "", "", payload))
}

/// Run the handshake until READY.
///
/// On failure the state is moved to [`SessionState::Shutdown`] and the error
/// is always [`ShimError::RegistrationFailed`].
pub async fn register<R>(
    reader: &mut MessageReader<R>,
    writer: &WriterHandle,
    chaincode_id: &str,
    timeout: Duration,
    state: &watch::Sender<SessionState>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let result = match tokio::time::timeout(timeout, handshake(reader, writer, chaincode_id, state)).await
    {
        Ok(result) => result,
        Err(_elapsed) => Err(ShimError::RegistrationFailed(format!(
            "no READY from peer within {}ms",
            timeout.as_millis()
        ))),
    };

    if let Err(e) = &result {
        tracing::error!(chaincode = chaincode_id, error = %e, "registration failed");
        state.send_replace(SessionState::Shutdown);
    }
    result
}

async fn handshake<R>(
    reader: &mut MessageReader<R>,
    writer: &WriterHandle,
    chaincode_id: &str,
    state: &watch::Sender<SessionState>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let register = register_message(chaincode_id)?;
    state.send_replace(SessionState::Registering);
    writer
        .send_message(&register)
        .await
        .map_err(|e| ShimError::RegistrationFailed(format!("sending REGISTER: {e}")))?;
    tracing::debug!(chaincode = chaincode_id, "sent REGISTER");

    loop {
        let msg = match reader.receive().await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                return Err(ShimError::RegistrationFailed(
                    "peer closed the stream before READY".to_string(),
                ))
            }
            Err(e) => return Err(ShimError::RegistrationFailed(e.to_string())),
        };

        let current = *state.borrow();
        match msg.msg_type {
            MessageType::Registered if current == SessionState::Registering => {
                state.send_replace(SessionState::Registered);
                tracing::info!(chaincode = chaincode_id, "registered with peer");
            }
            MessageType::Registered => {
                tracing::warn!(state = %current, "ignoring repeated REGISTERED");
            }
            MessageType::Ready if current == SessionState::Registered => {
                state.send_replace(SessionState::Ready);
                tracing::info!(chaincode = chaincode_id, "session ready");
                return Ok(());
            }
            MessageType::Ready => {
                return Err(ShimError::RegistrationFailed(format!(
                    "READY received in state {current}"
                )));
            }
            MessageType::Error => {
                return Err(ShimError::RegistrationFailed(format!(
                    "peer rejected registration: {}",
                    msg.payload_text()
                )));
            }
            MessageType::Keepalive => {
                if let Err(e) = writer.try_send_message(&msg) {
                    tracing::warn!(error = %e, "failed to echo KEEPALIVE");
                }
            }
            other if other.is_invocation() => {
                tracing::warn!(
                    key = %msg.key(),
                    msg_type = %other,
                    state = %current,
                    "invocation before READY; discarding"
                );
            }
            other => {
                tracing::warn!(msg_type = %other, state = %current, "unexpected message during registration; discarding");
            }
        }
    }
}
