//! In-memory backend for tests and offline runs

use crate::transport::{Connection, Connector, TransportEvent};
use crate::SessionError;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// How the mock answers connection attempts
#[derive(Debug, Clone, PartialEq)]
pub enum MockMode {
    /// Accept and hand a [`MockLink`] to the backend
    Accept,
    /// Fail immediately with the given reason
    Refuse(String),
    /// Never complete (exercises the connect timeout)
    Hang,
}

/// Connector that links sessions to a [`MockBackend`]
#[derive(Clone)]
pub struct MockConnector {
    mode: Arc<Mutex<MockMode>>,
    links: mpsc::UnboundedSender<MockLink>,
    attempts: Arc<Mutex<u32>>,
}

/// Backend side of the mock: receives one link per accepted connection
pub struct MockBackend {
    links: mpsc::UnboundedReceiver<MockLink>,
}

/// One accepted connection, seen from the backend
pub struct MockLink {
    /// URL the session connected to
    pub url: String,
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<TransportEvent>,
}

impl MockConnector {
    /// Create a connector and its backend handle
    pub fn new() -> (Self, MockBackend) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                mode: Arc::new(Mutex::new(MockMode::Accept)),
                links: tx,
                attempts: Arc::new(Mutex::new(0)),
            },
            MockBackend { links: rx },
        )
    }

    /// Change how subsequent attempts are answered
    pub fn set_mode(&self, mode: MockMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
    }

    /// Number of connection attempts seen so far
    pub fn attempts(&self) -> u32 {
        self.attempts.lock().map(|a| *a).unwrap_or(0)
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Connection, SessionError>> {
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts += 1;
        }
        let mode = self
            .mode
            .lock()
            .map(|m| m.clone())
            .unwrap_or(MockMode::Accept);

        Box::pin(async move {
            match mode {
                MockMode::Refuse(reason) => Err(SessionError::Connect(reason)),
                MockMode::Hang => std::future::pending().await,
                MockMode::Accept => {
                    let (out_tx, out_rx) = mpsc::channel(64);
                    let (in_tx, in_rx) = mpsc::channel(64);
                    let link = MockLink {
                        url: url.to_string(),
                        from_client: out_rx,
                        to_client: in_tx,
                    };
                    self.links
                        .send(link)
                        .map_err(|_| SessionError::Connect("mock backend gone".to_string()))?;
                    debug!("Mock backend accepted {}", url);
                    Ok(Connection {
                        outbound: out_tx,
                        inbound: in_rx,
                    })
                }
            }
        })
    }
}

impl MockBackend {
    /// Wait for the next accepted connection
    pub async fn accept(&mut self) -> Option<MockLink> {
        self.links.recv().await
    }
}

impl MockLink {
    /// Next payload sent by the session; `None` once the session let go
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Deliver a text payload to the session
    pub async fn reply(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(TransportEvent::Message(text.into()))
            .await
            .is_ok()
    }

    /// Deliver a transport keepalive
    pub async fn keepalive(&self) -> bool {
        self.to_client.send(TransportEvent::Keepalive).await.is_ok()
    }

    /// Simulate a transport error
    pub async fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Error(reason.to_string()))
            .await;
    }

    /// Simulate the backend closing the stream
    pub async fn close(&self) {
        let _ = self.to_client.send(TransportEvent::Closed).await;
    }
}
