//! Streaming Session
//!
//! Owns one logical connection to the inference backend: connect with
//! timeout, heartbeat supervision, ordered inbound delivery and an explicit
//! state machine. Reconnecting is left to the caller.

mod error;
mod message;
pub mod mock;
mod session;
mod state;
mod transport;

pub use error::SessionError;
pub use message::{stream_url, FrameMessage, STREAM_PATH};
pub use mock::{MockBackend, MockConnector, MockLink};
pub use session::{SessionConfig, SessionEvent, StreamSession};
pub use state::SessionState;
pub use transport::{Connection, Connector, TransportEvent, WebSocketConnector};
