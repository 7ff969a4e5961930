//! Fan-out of one alert to every enabled channel

use crate::{ChannelError, NotificationChannel};
use alerting::Alert;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which optional channels are enabled. History is always recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub audio: bool,
    pub desktop: bool,
    pub in_app: bool,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            audio: true,
            desktop: true,
            in_app: true,
        }
    }
}

/// Result of one channel for one alert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum Outcome {
    Delivered,
    /// Permission missing or backend unavailable
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReport {
    pub channel: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutReport {
    pub alert_id: String,
    pub channels: Vec<ChannelReport>,
}

impl FanoutReport {
    pub fn outcome(&self, channel: &str) -> Option<&Outcome> {
        self.channels
            .iter()
            .find(|r| r.channel == channel)
            .map(|r| &r.outcome)
    }

    pub fn delivered(&self) -> usize {
        self.channels
            .iter()
            .filter(|r| r.outcome == Outcome::Delivered)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.channels
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
            .count()
    }
}

/// Drives every registered channel concurrently
#[derive(Default, Clone)]
pub struct NotificationFanout {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        debug!("Registered notification channel: {}", channel.name());
        self.channels.push(channel);
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Notify every channel. Channel errors are logged and reported, never
    /// returned.
    pub async fn dispatch(&self, alert: &Alert) -> FanoutReport {
        let results = join_all(self.channels.iter().map(|c| c.notify(alert))).await;

        let channels: Vec<ChannelReport> = self
            .channels
            .iter()
            .zip(results)
            .map(|(channel, result)| {
                let outcome = match result {
                    Ok(()) => Outcome::Delivered,
                    Err(e @ (ChannelError::PermissionDenied | ChannelError::Unavailable(_))) => {
                        debug!("Channel {} skipped for {}: {}", channel.name(), alert.id, e);
                        Outcome::Skipped(e.to_string())
                    }
                    Err(ChannelError::Failed(reason)) => {
                        warn!("Channel {} failed for {}: {}", channel.name(), alert.id, reason);
                        Outcome::Failed(reason)
                    }
                };
                ChannelReport {
                    channel: channel.name(),
                    outcome,
                }
            })
            .collect();

        let report = FanoutReport {
            alert_id: alert.id.clone(),
            channels,
        };
        info!(
            "Alert {} dispatched: {}/{} channels delivered",
            alert.id,
            report.delivered(),
            report.channels.len()
        );
        report
    }
}
