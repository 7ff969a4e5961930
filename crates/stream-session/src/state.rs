//! Session state machine

use serde::Serialize;
use std::fmt;

/// Connection status of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Failed)
                | (Connecting, Closing)
                | (Open, Closing)
                | (Open, Failed)
                | (Closing, Closed)
                | (Failed, Connecting)
                | (Failed, Closed)
                | (Closed, Connecting)
        )
    }

    /// Whether `open()` may be called from this state
    pub fn can_open(self) -> bool {
        self.can_transition_to(SessionState::Connecting)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
