//! Alert service
//!
//! The one notifier every producer (live pipeline, upload route) is handed.
//! It owns the deduplicator, records admitted alerts, drives fan-out and
//! schedules auto-acknowledge. It is the only path through which alerts are
//! acknowledged or dismissed.

use alert_history::{AlertHistoryStore, HistoryStats};
use alerting::{Alert, AlertConfig, AlertMetadata, AlertSource, AutoAcknowledger, ConfigError, Deduplicator};
use metrics::counter;
use notification::{
    AudioChannel, ChannelReport, CloseReason, DesktopChannel, FanoutConfig, FanoutReport,
    HistoryChannel, InAppChannel, NotificationFanout, Outcome, Permission,
};
use result_router::DetectionResult;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Channel instances the service drives directly as well as through fan-out
pub struct Channels {
    pub audio: Arc<AudioChannel>,
    pub desktop: Arc<DesktopChannel>,
    pub in_app: InAppChannel,
}

/// An alert that passed the cooldown check
pub struct Admitted {
    pub alert: Alert,
    /// Completes once every channel has been notified
    pub delivery: JoinHandle<FanoutReport>,
}

/// History counts plus deduplicator counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    #[serde(flatten)]
    pub history: HistoryStats,
    pub admitted: u64,
    pub suppressed: u64,
}

pub struct AlertService {
    dedup: Mutex<Deduplicator>,
    history: Arc<AlertHistoryStore>,
    recorder: HistoryChannel,
    fanout: NotificationFanout,
    auto_ack: AutoAcknowledger,
    channels: Channels,
    me: Weak<AlertService>,
}

impl AlertService {
    pub fn new(
        config: AlertConfig,
        fanout_config: &FanoutConfig,
        history: Arc<AlertHistoryStore>,
        channels: Channels,
    ) -> Result<Arc<Self>, ConfigError> {
        let dedup = Deduplicator::new(config)?;

        let mut fanout = NotificationFanout::new();
        if fanout_config.audio {
            fanout.add_channel(channels.audio.clone());
        }
        if fanout_config.desktop {
            fanout.add_channel(channels.desktop.clone());
        }
        if fanout_config.in_app {
            fanout.add_channel(Arc::new(channels.in_app.clone()));
        }
        info!("Alert channels: history, {}", fanout.channel_names().join(", "));

        Ok(Arc::new_cyclic(|me| Self {
            dedup: Mutex::new(dedup),
            recorder: HistoryChannel::new(Arc::clone(&history)),
            history,
            fanout,
            auto_ack: AutoAcknowledger::new(),
            channels,
            me: me.clone(),
        }))
    }

    fn dedup(&self) -> MutexGuard<'_, Deduplicator> {
        self.dedup.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> AlertConfig {
        self.dedup().config().clone()
    }

    pub fn history(&self) -> &Arc<AlertHistoryStore> {
        &self.history
    }

    pub fn in_app(&self) -> &InAppChannel {
        &self.channels.in_app
    }

    /// First user interaction; unblocks an activation-gated audio channel
    pub fn activate_audio(&self) {
        self.channels.audio.activate();
    }

    /// Ask the desktop for notification permission
    pub async fn request_desktop_permission(&self) -> Permission {
        self.channels.desktop.request_permission().await
    }

    /// Report an accident result. Returns the new alert, or `None` when the
    /// result is not an accident or falls inside the cooldown window.
    ///
    /// The alert is in the history before this returns; the other channels
    /// are notified on a spawned task.
    pub fn report(
        &self,
        result: DetectionResult,
        source: AlertSource,
        metadata: AlertMetadata,
    ) -> Option<Admitted> {
        if !result.accident_detected() {
            return None;
        }

        // Check-and-set on the cooldown clock happens under this lock.
        let (admitted, config) = {
            let mut dedup = self.dedup();
            (dedup.admit(result, source, metadata), dedup.config().clone())
        };

        let Some(alert) = admitted else {
            counter!("alerts_suppressed_total", "source" => source.as_str()).increment(1);
            return None;
        };
        counter!(
            "alerts_admitted_total",
            "source" => source.as_str(),
            "severity" => alert.severity.as_str()
        )
        .increment(1);

        let recorded = match self.recorder.record(&alert) {
            Ok(()) => Outcome::Delivered,
            Err(e) => {
                warn!("Failed to record alert {}: {}", alert.id, e);
                Outcome::Failed(e.to_string())
            }
        };

        let fanout = self.fanout.clone();
        let dispatched = alert.clone();
        let delivery = tokio::spawn(async move {
            let mut report = fanout.dispatch(&dispatched).await;
            report.channels.insert(
                0,
                ChannelReport {
                    channel: "history",
                    outcome: recorded,
                },
            );
            report
        });

        if config.auto_acknowledge {
            let me = self.me.clone();
            self.auto_ack
                .schedule(&alert.id, config.alert_duration(), move |id| {
                    if let Some(service) = me.upgrade() {
                        debug!("Auto-acknowledging {}", id);
                        service.settle(id, CloseReason::Acknowledged);
                    }
                });
        }

        Some(Admitted { alert, delivery })
    }

    /// Cue for a finished non-accident result
    pub fn notify_completion(&self, result: &DetectionResult) -> JoinHandle<()> {
        let audio = Arc::clone(&self.channels.audio);
        let desktop = Arc::clone(&self.channels.desktop);
        let body = format!(
            "No accident detected ({:.0}% confidence)",
            result.confidence() * 100.0
        );
        tokio::spawn(async move {
            audio.play_completion().await;
            desktop.notify_info("Analysis complete", &body).await;
        })
    }

    fn settle(&self, id: &str, reason: CloseReason) -> bool {
        self.channels.in_app.close(id, reason);
        match reason {
            CloseReason::Dismissed => self.history.dismiss(id),
            _ => self.history.acknowledge(id),
        }
    }

    /// Acknowledge an alert, cancelling its auto-acknowledge timer.
    /// Returns `false` if already acknowledged or unknown.
    pub fn acknowledge(&self, id: &str) -> bool {
        self.auto_ack.cancel(id);
        self.settle(id, CloseReason::Acknowledged)
    }

    /// Dismiss an alert, cancelling its auto-acknowledge timer
    pub fn dismiss(&self, id: &str) -> bool {
        self.auto_ack.cancel(id);
        self.settle(id, CloseReason::Dismissed)
    }

    /// Drop every alert and pending timer
    pub fn clear(&self) {
        self.auto_ack.cancel_all();
        if let Some(current) = self.channels.in_app.current() {
            self.channels.in_app.close(&current.id, CloseReason::Dismissed);
        }
        self.history.clear();
    }

    pub fn list(&self) -> Vec<Alert> {
        self.history.list()
    }

    pub fn get(&self, id: &str) -> Option<Alert> {
        self.history.get(id)
    }

    pub fn stats(&self) -> AlertStats {
        let dedup = self.dedup();
        AlertStats {
            history: self.history.stats(),
            admitted: dedup.admitted(),
            suppressed: dedup.suppressed(),
        }
    }

    /// Auto-acknowledge timers still pending
    pub fn pending_auto_acknowledgements(&self) -> usize {
        self.auto_ack.pending()
    }
}
