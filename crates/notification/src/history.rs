//! History persistence channel

use crate::{ChannelError, NotificationChannel};
use alert_history::AlertHistoryStore;
use alerting::Alert;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Records each alert in the history store
pub struct HistoryChannel {
    store: Arc<AlertHistoryStore>,
}

impl HistoryChannel {
    pub fn new(store: Arc<AlertHistoryStore>) -> Self {
        Self { store }
    }

    /// Append without going through an async dispatch
    pub fn record(&self, alert: &Alert) -> Result<(), ChannelError> {
        self.store
            .append(alert.clone())
            .map_err(|e| ChannelError::Failed(e.to_string()))
    }
}

impl NotificationChannel for HistoryChannel {
    fn name(&self) -> &'static str {
        "history"
    }

    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), ChannelError>> {
        let recorded = self.record(alert);
        Box::pin(async move { recorded })
    }
}
