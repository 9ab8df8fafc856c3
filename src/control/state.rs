//! Session lifecycle state.

use std::fmt;

/// Where the session is in its lifecycle.
///
/// Transitions only move forward:
/// `Unregistered → Registering → Registered → Ready → Shutdown`, with a jump
/// to `Shutdown` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Unregistered,
    Registering,
    Registered,
    Ready,
    Shutdown,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Unregistered => "UNREGISTERED",
            SessionState::Registering => "REGISTERING",
            SessionState::Registered => "REGISTERED",
            SessionState::Ready => "READY",
            SessionState::Shutdown => "SHUTDOWN",
        }
    }

    /// Invocations are only executed in this state.
    #[inline]
    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }

    #[inline]
    pub fn is_shutdown(self) -> bool {
        self == SessionState::Shutdown
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
