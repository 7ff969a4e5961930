//! Cancelable auto-acknowledge timers

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Timers = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// Per-alert timers that fire at most once.
///
/// A firing timer removes its own entry before running its action, and
/// [`AutoAcknowledger::cancel`] removes and aborts. Whichever happens first
/// wins, so the action never runs after a successful cancel.
#[derive(Default, Clone)]
pub struct AutoAcknowledger {
    timers: Timers,
}

impl AutoAcknowledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action(id)` after `delay` unless cancelled first.
    /// Rescheduling an id replaces its pending timer.
    pub fn schedule<F>(&self, id: &str, delay: Duration, action: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let Ok(mut timers) = self.timers.lock() else {
            warn!("Auto-acknowledge timers poisoned, not scheduling {}", id);
            return;
        };

        let registry = Arc::clone(&self.timers);
        let key = id.to_string();
        // The lock is held until the handle is registered, so the task can
        // never look for its entry before it exists.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let due = registry
                .lock()
                .map(|mut t| t.remove(&key).is_some())
                .unwrap_or(false);
            if due {
                debug!("Auto-acknowledge firing for {}", key);
                action(&key);
            }
        });

        if let Some(previous) = timers.insert(id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Cancel the timer for `id`. Returns `true` if one was pending.
    pub fn cancel(&self, id: &str) -> bool {
        let handle = self.timers.lock().ok().and_then(|mut t| t.remove(id));
        match handle {
            Some(handle) => {
                handle.abort();
                debug!("Auto-acknowledge cancelled for {}", id);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer
    pub fn cancel_all(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }

    /// Number of pending timers
    pub fn pending(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }
}
