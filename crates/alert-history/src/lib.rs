//! Alert History
//!
//! Append-only, capacity-bounded alert log persisted to a durable key-value
//! slot, with a change broadcast so other consumers can resynchronize.

mod bus;
mod slot;
mod store;

pub use bus::{ChangeBroadcast, ChangeKind, HistoryChange, InProcessBus};
pub use slot::{FileSlot, KeyValueSlot, MemorySlot};
pub use store::{AlertHistoryStore, HistoryConfig, HistoryStats, HISTORY_KEY, MAX_CAPACITY};

use result_router::ValidationError;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid alert: {0}")]
    Validation(#[from] ValidationError),

    #[error("Duplicate alert id: {0}")]
    Duplicate(String),

    #[error("Invalid history configuration: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
