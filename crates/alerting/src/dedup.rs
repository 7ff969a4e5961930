//! Cooldown deduplication

use crate::alert::{Alert, AlertMetadata, AlertSource};
use crate::ConfigError;
use result_router::DetectionResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Upper bound for the cooldown and alert duration (one day)
pub const MAX_WINDOW_SECONDS: f64 = 86_400.0;

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum time between two admitted alerts (seconds)
    pub cooldown_seconds: f64,
    /// Acknowledge alerts automatically after `alert_duration_seconds`
    pub auto_acknowledge: bool,
    /// How long an alert stays up before auto-acknowledge (seconds)
    pub alert_duration_seconds: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 10.0,
            auto_acknowledge: false,
            alert_duration_seconds: 5.0,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // NaN fails both range checks.
        if !(0.0..=MAX_WINDOW_SECONDS).contains(&self.cooldown_seconds) {
            return Err(ConfigError::InvalidCooldown(self.cooldown_seconds));
        }
        if !(self.alert_duration_seconds > 0.0 && self.alert_duration_seconds <= MAX_WINDOW_SECONDS)
        {
            return Err(ConfigError::InvalidAlertDuration(self.alert_duration_seconds));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        window(self.cooldown_seconds)
    }

    pub fn alert_duration(&self) -> Duration {
        window(self.alert_duration_seconds)
    }
}

/// Seconds to a `Duration`, clamped to `0..=MAX_WINDOW_SECONDS`
fn window(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.clamp(0.0, MAX_WINDOW_SECONDS)).unwrap_or_default()
}

/// Time of the last admitted alert
#[derive(Debug, Clone, Copy, Default)]
pub struct CooldownClock {
    last_alert_at: Option<Instant>,
}

impl CooldownClock {
    pub fn last_alert_at(&self) -> Option<Instant> {
        self.last_alert_at
    }
}

/// Admits or suppresses accident detections based on a cooldown window.
///
/// Best-effort debounce: callers must serialize access, there is no internal
/// locking around the check-and-set.
pub struct Deduplicator {
    config: AlertConfig,
    clock: CooldownClock,
    admitted: u64,
    suppressed: u64,
}

impl Deduplicator {
    /// Create a deduplicator, rejecting invalid configuration
    pub fn new(config: AlertConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!("Creating deduplicator with config: {:?}", config);
        Ok(Self {
            config,
            clock: CooldownClock::default(),
            admitted: 0,
            suppressed: 0,
        })
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn clock(&self) -> CooldownClock {
        self.clock
    }

    /// Admit `detection` as an alert unless still inside the cooldown window
    pub fn admit(
        &mut self,
        detection: DetectionResult,
        source: AlertSource,
        metadata: AlertMetadata,
    ) -> Option<Alert> {
        self.admit_at(detection, source, metadata, Instant::now())
    }

    /// [`Deduplicator::admit`] with an explicit clock reading
    pub fn admit_at(
        &mut self,
        detection: DetectionResult,
        source: AlertSource,
        metadata: AlertMetadata,
        now: Instant,
    ) -> Option<Alert> {
        if !detection.accident_detected() {
            debug!("Ignoring non-accident result for frame {}", detection.frame_id());
            return None;
        }

        if let Some(last) = self.clock.last_alert_at {
            if now.saturating_duration_since(last) < self.config.cooldown() {
                self.suppressed += 1;
                debug!(
                    "Alert suppressed: {:?} since last alert, cooldown {}s",
                    now.saturating_duration_since(last),
                    self.config.cooldown_seconds
                );
                return None;
            }
        }

        self.clock.last_alert_at = Some(now);
        self.admitted += 1;
        let alert = Alert::new(detection, source, metadata);
        info!(
            "Alert admitted: {} ({} severity, source {})",
            alert.id,
            alert.severity,
            alert.source.as_str()
        );
        Some(alert)
    }

    /// Alerts admitted so far
    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    /// Detections suppressed so far
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
