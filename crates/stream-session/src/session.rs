//! Streaming session implementation

use crate::message::FrameMessage;
use crate::state::SessionState;
use crate::transport::{Connection, Connector, TransportEvent};
use crate::SessionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Keepalive sent by the client
const PING_MESSAGE: &str = r#"{"type":"ping"}"#;

/// Session timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum wait for the stream to open (milliseconds)
    pub connect_timeout_ms: u64,
    /// Maximum silence from the backend before the session fails (milliseconds)
    pub heartbeat_timeout_ms: u64,
    /// Interval between client pings (milliseconds)
    pub ping_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 12_000,
            heartbeat_timeout_ms: 30_000,
            ping_interval_ms: 10_000,
        }
    }
}

/// Event produced by [`StreamSession::recv`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One inbound payload
    Message(String),
    /// The session moved to `failed`
    Failed(SessionError),
}

type StateHandler = Box<dyn FnMut(SessionState, SessionState) + Send>;

/// One logical connection to the inference backend.
///
/// The session never reconnects on its own. It reports `failed` and the
/// caller decides whether to call [`StreamSession::open`] again.
pub struct StreamSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    handlers: Vec<StateHandler>,
    link: Option<Connection>,
    endpoint: Option<String>,
    last_inbound: Instant,
}

impl StreamSession {
    /// Create an idle session
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            connector,
            state: SessionState::Idle,
            state_tx,
            handlers: Vec::new(),
            link: None,
            endpoint: None,
            last_inbound: Instant::now(),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is open
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Endpoint of the most recent `open`
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only view of the state for observers outside the driving task
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Register a handler called with `(previous, next)` on every transition.
    ///
    /// Handlers run synchronously inside the transition.
    pub fn on_state_change<F>(&mut self, handler: F)
    where
        F: FnMut(SessionState, SessionState) + Send + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    fn transition(&mut self, next: SessionState) -> bool {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            warn!("Rejected session transition {} -> {}", previous, next);
            return false;
        }
        self.state = next;
        self.state_tx.send_replace(next);
        for handler in self.handlers.iter_mut() {
            handler(previous, next);
        }
        info!("Session {} -> {}", previous, next);
        true
    }

    /// Open the stream. Fails with `ConnectTimeout` if the transport does not
    /// come up within the configured bound.
    pub async fn open(&mut self, endpoint: &str) -> Result<(), SessionError> {
        if !self.state.can_open() {
            return Err(SessionError::InvalidState(format!(
                "cannot open while {}",
                self.state
            )));
        }

        self.endpoint = Some(endpoint.to_string());
        self.transition(SessionState::Connecting);

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connector = Arc::clone(&self.connector);
        let result = tokio::time::timeout(timeout, connector.connect(endpoint)).await;

        match result {
            Ok(Ok(connection)) => {
                self.link = Some(connection);
                self.last_inbound = Instant::now();
                self.transition(SessionState::Open);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Failed to open stream to {}: {}", endpoint, e);
                self.transition(SessionState::Failed);
                Err(e)
            }
            Err(_) => {
                let err = SessionError::ConnectTimeout(self.config.connect_timeout_ms);
                warn!("Failed to open stream to {}: {}", endpoint, err);
                self.transition(SessionState::Failed);
                Err(err)
            }
        }
    }

    fn send_text(&self, text: String) -> bool {
        if self.state != SessionState::Open {
            return false;
        }
        match self.link.as_ref() {
            Some(link) => match link.outbound.try_send(text) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Outbound payload not queued: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Submit a frame. Returns `false` if the session is not open or the
    /// transport cannot take the payload.
    pub fn send(&self, message: &FrameMessage) -> bool {
        if self.state != SessionState::Open {
            return false;
        }
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!("{}", SessionError::Serialization(e.to_string()));
                false
            }
        }
    }

    /// Send a keepalive ping
    pub fn ping(&self) -> bool {
        self.send_text(PING_MESSAGE.to_string())
    }

    /// Next inbound event, in arrival order.
    ///
    /// Pends forever while the session is not open, so it is safe to use as
    /// a `select!` branch guarded by [`StreamSession::is_open`].
    pub async fn recv(&mut self) -> SessionEvent {
        loop {
            let heartbeat = Duration::from_millis(self.config.heartbeat_timeout_ms);
            let deadline = self.last_inbound + heartbeat;

            let outcome = {
                let Some(link) = self.link.as_mut() else {
                    return std::future::pending().await;
                };
                tokio::select! {
                    biased;
                    event = link.inbound.recv() => Some(event),
                    _ = tokio::time::sleep_until(deadline) => None,
                }
            };

            match outcome {
                Some(Some(TransportEvent::Message(text))) => {
                    self.last_inbound = Instant::now();
                    return SessionEvent::Message(text);
                }
                Some(Some(TransportEvent::Keepalive)) => {
                    self.last_inbound = Instant::now();
                }
                Some(Some(TransportEvent::Error(reason))) => {
                    return self.fail(SessionError::Dropped(reason));
                }
                Some(Some(TransportEvent::Closed)) | Some(None) => {
                    return self.fail(SessionError::ClosedByPeer);
                }
                None => {
                    return self.fail(SessionError::HeartbeatTimeout(
                        self.config.heartbeat_timeout_ms,
                    ));
                }
            }
        }
    }

    fn fail(&mut self, error: SessionError) -> SessionEvent {
        warn!("Stream failed: {}", error);
        self.link = None;
        self.transition(SessionState::Failed);
        SessionEvent::Failed(error)
    }

    /// Close the stream. No-op when idle or already closed.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Open | SessionState::Connecting => {
                self.transition(SessionState::Closing);
                self.link = None;
                self.transition(SessionState::Closed);
            }
            SessionState::Failed => {
                self.link = None;
                self.transition(SessionState::Closed);
            }
            _ => debug!("Close ignored while {}", self.state),
        }
    }

    /// Give up on a failed session. It stays closed until explicitly reopened.
    pub fn abandon(&mut self) {
        if self.state == SessionState::Failed {
            info!("Abandoning stream after repeated failures");
            self.transition(SessionState::Closed);
        }
    }
}
