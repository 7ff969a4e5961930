//! Message transport
//!
//! A [`Connection`] is a pair of channels. The session never touches the
//! socket directly, which keeps it agnostic of the concrete transport.

use crate::SessionError;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Event surfaced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Inbound text payload
    Message(String),
    /// Transport-level keepalive (ping/pong frame); counts as traffic
    Keepalive,
    /// Transport error; the connection is unusable afterwards
    Error(String),
    /// Peer closed the connection
    Closed,
}

/// An established connection
pub struct Connection {
    /// Outbound text payloads. Dropping the sender closes the connection.
    pub outbound: mpsc::Sender<String>,
    /// Inbound events, in arrival order
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to a streaming endpoint
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Connection, SessionError>>;
}

/// WebSocket transport
pub struct WebSocketConnector {
    /// Channel capacity in each direction
    buffer: usize,
}

impl WebSocketConnector {
    pub fn new(buffer: usize) -> Self {
        Self { buffer: buffer.max(1) }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Connection, SessionError>> {
        Box::pin(async move {
            info!("Connecting websocket to {}", url);
            let (socket, _response) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| SessionError::Connect(e.to_string()))?;

            let (mut sink, mut stream) = socket.split();
            let (out_tx, mut out_rx) = mpsc::channel::<String>(self.buffer);
            let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(self.buffer);

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        outbound = out_rx.recv() => match outbound {
                            Some(text) => {
                                if let Err(e) = sink.send(Message::Text(text)).await {
                                    let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                                    break;
                                }
                            }
                            None => {
                                debug!("Session released connection, closing websocket");
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                        },
                        inbound = stream.next() => {
                            let event = match inbound {
                                Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
                                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                                    Ok(text) => TransportEvent::Message(text),
                                    Err(_) => {
                                        warn!("Dropping non-UTF-8 binary frame");
                                        continue;
                                    }
                                },
                                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                    TransportEvent::Keepalive
                                }
                                Some(Ok(Message::Frame(_))) => continue,
                                Some(Ok(Message::Close(_))) | None => TransportEvent::Closed,
                                Some(Err(e)) => TransportEvent::Error(e.to_string()),
                            };
                            let terminal = matches!(
                                event,
                                TransportEvent::Closed | TransportEvent::Error(_)
                            );
                            if in_tx.send(event).await.is_err() || terminal {
                                break;
                            }
                        }
                    }
                }
                debug!("Websocket pump finished");
            });

            Ok(Connection {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}
