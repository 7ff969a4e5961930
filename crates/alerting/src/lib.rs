//! Alerting
//!
//! Turns accident detections into user-facing alerts: cooldown
//! deduplication, severity mapping and cancelable auto-acknowledge timers.

mod alert;
mod auto_ack;
mod dedup;

pub use alert::{Alert, AlertMetadata, AlertSource, Severity};
pub use auto_ack::AutoAcknowledger;
pub use dedup::{AlertConfig, CooldownClock, Deduplicator, MAX_WINDOW_SECONDS};

use thiserror::Error;

/// Invalid alerting configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cooldown_seconds must be between 0 and 86400, got {0}")]
    InvalidCooldown(f64),

    #[error("alert_duration_seconds must be positive and at most 86400, got {0}")]
    InvalidAlertDuration(f64),
}
