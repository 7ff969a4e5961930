//! Session Error Types

use thiserror::Error;

/// Errors raised by the streaming session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// Transport failed to open
    #[error("Connection failed: {0}")]
    Connect(String),

    /// No open transition within the connect timeout
    #[error("Timed out after {0}ms waiting for the stream to open")]
    ConnectTimeout(u64),

    /// Transport dropped while open
    #[error("Connection dropped: {0}")]
    Dropped(String),

    /// Peer closed the stream
    #[error("Stream closed by backend")]
    ClosedByPeer,

    /// No inbound traffic within the heartbeat window
    #[error("No traffic from backend for {0}ms")]
    HeartbeatTimeout(u64),

    /// Operation not allowed in the current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Outbound payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}
