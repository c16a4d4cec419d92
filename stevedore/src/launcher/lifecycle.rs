//! Server process lifecycle.
//!
//! ```text
//! STOPPED → BINDING → SERVING → DRAINING → STOPPED
//!              └──────→ STOPPED (bind failed)
//! ```

use parking_lot::Mutex;
use std::fmt;
use stevedore_shared::{StevedoreError, StevedoreResult};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Binding,
    Serving,
    Draining,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Binding => "binding",
            ServerStatus::Serving => "serving",
            ServerStatus::Draining => "draining",
        }
    }

    pub fn can_transition_to(&self, next: ServerStatus) -> bool {
        use ServerStatus::*;
        matches!(
            (self, next),
            (Stopped, Binding)
                | (Binding, Serving)
                | (Binding, Stopped)
                | (Serving, Draining)
                | (Draining, Stopped)
        )
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one server instance, shared between the launcher and its handle.
#[derive(Debug)]
pub struct ServerState {
    instance: Ulid,
    status: Mutex<ServerStatus>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            instance: Ulid::new(),
            status: Mutex::new(ServerStatus::Stopped),
        }
    }

    pub fn instance(&self) -> Ulid {
        self.instance
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.lock()
    }

    pub fn transition(&self, next: ServerStatus) -> StevedoreResult<()> {
        let mut status = self.status.lock();
        if !status.can_transition_to(next) {
            return Err(StevedoreError::InvalidState(format!(
                "server cannot move from {} to {}",
                *status, next
            )));
        }
        tracing::debug!(instance = %self.instance, from = status.as_str(), to = next.as_str(), "Server status changed");
        *status = next;
        Ok(())
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let state = ServerState::new();
        for next in [
            ServerStatus::Binding,
            ServerStatus::Serving,
            ServerStatus::Draining,
            ServerStatus::Stopped,
        ] {
            state.transition(next).unwrap();
        }
        assert_eq!(state.status(), ServerStatus::Stopped);
    }

    #[test]
    fn test_bind_failure_returns_to_stopped() {
        let state = ServerState::new();
        state.transition(ServerStatus::Binding).unwrap();
        state.transition(ServerStatus::Stopped).unwrap();
    }

    #[test]
    fn test_illegal_transitions() {
        let state = ServerState::new();
        assert!(matches!(
            state.transition(ServerStatus::Serving),
            Err(StevedoreError::InvalidState(_))
        ));
        state.transition(ServerStatus::Binding).unwrap();
        state.transition(ServerStatus::Serving).unwrap();
        assert!(state.transition(ServerStatus::Binding).is_err());
        assert!(state.transition(ServerStatus::Stopped).is_err());
        assert_eq!(state.status(), ServerStatus::Serving);
    }
}
