//! Change broadcast between history consumers

use tokio::sync::broadcast;
use uuid::Uuid;

/// What changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Appended(String),
    Acknowledged(String),
    Dismissed(String),
    Cleared,
}

/// Change notification published after every persisted mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryChange {
    /// Store instance that made the change
    pub origin: Uuid,
    pub kind: ChangeKind,
}

/// Publish/subscribe channel for history invalidation.
///
/// The in-process bus is the default; other implementations can bridge
/// processes without changing the store.
pub trait ChangeBroadcast: Send + Sync {
    fn publish(&self, change: HistoryChange);

    fn subscribe(&self) -> broadcast::Receiver<HistoryChange>;
}

/// Broadcast within one process
#[derive(Debug, Clone)]
pub struct InProcessBus {
    tx: broadcast::Sender<HistoryChange>,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ChangeBroadcast for InProcessBus {
    fn publish(&self, change: HistoryChange) {
        // No subscribers is fine.
        let _ = self.tx.send(change);
    }

    fn subscribe(&self) -> broadcast::Receiver<HistoryChange> {
        self.tx.subscribe()
    }
}
