//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file (`config/alertd.toml` or the path in `ALERTD_CONFIG`), then
//! `ALERTD_*` environment variables with `__` between nested keys, e.g.
//! `ALERTD_ALERTS__COOLDOWN_SECONDS=15`.

use crate::rate_limit::RateLimitConfig;
use alert_history::HistoryConfig;
use alerting::AlertConfig;
use config::{Config, Environment, File};
use frame_source::SourceConfig;
use notification::FanoutConfig;
use sampling_scheduler::{BackoffPolicy, SamplingConfig};
use serde::{Deserialize, Serialize};
use stream_session::SessionConfig;
use thiserror::Error;
use tracing::Level;

const DEFAULT_CONFIG_PATH: &str = "config/alertd";

/// Configuration errors, reported once at startup
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration for {section}: {reason}")]
    Invalid { section: &'static str, reason: String },
}

impl AppConfigError {
    fn invalid(section: &'static str, reason: impl ToString) -> Self {
        AppConfigError::Invalid {
            section,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Option<Level> {
        self.level.parse().ok()
    }
}

/// Inference backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; the live stream is `{url}/live/stream` over ws/wss
    pub url: String,
    /// Path of the batch inference endpoint
    pub batch_path: String,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            batch_path: "/predict".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl BackendConfig {
    pub fn batch_url(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.batch_path.trim_start_matches('/')
        )
    }
}

/// Upload route limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted request body, multipart framing included
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Live camera monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub enabled: bool,
    /// Location label attached to live alerts
    pub location: Option<String>,
    pub source: SourceConfig,
    pub sampling: SamplingConfig,
    pub session: SessionConfig,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channels: FanoutConfig,
    /// Player fed raw PCM on stdin
    pub audio_player: String,
    /// Keep audio silent until the first user interaction
    pub require_audio_activation: bool,
    pub notify_program: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channels: FanoutConfig::default(),
            audio_player: "aplay".to_string(),
            require_audio_activation: false,
            notify_program: "notify-send".to_string(),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
    pub live: LiveConfig,
    pub alerts: AlertConfig,
    pub history: HistoryConfig,
    pub notifications: NotificationConfig,
    pub upload: UploadConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Load from the default locations
    pub fn load() -> Result<Self, AppConfigError> {
        let path =
            std::env::var("ALERTD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load with `path` as the optional file layer
    pub fn load_from(path: &str) -> Result<Self, AppConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("ALERTD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppConfigError> {
        if self.logging.level().is_none() {
            return Err(AppConfigError::invalid(
                "logging",
                format!("unknown level `{}`", self.logging.level),
            ));
        }
        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
            return Err(AppConfigError::invalid(
                "backend",
                format!("url `{}` must be http(s)", self.backend.url),
            ));
        }
        self.alerts
            .validate()
            .map_err(|e| AppConfigError::invalid("alerts", e))?;
        self.history
            .validate()
            .map_err(|e| AppConfigError::invalid("history", e))?;
        self.live
            .sampling
            .validate()
            .map_err(|e| AppConfigError::invalid("live.sampling", e))?;
        self.live
            .backoff
            .validate()
            .map_err(|e| AppConfigError::invalid("live.backoff", e))?;
        if self.live.session.connect_timeout_ms == 0 || self.live.session.heartbeat_timeout_ms == 0 {
            return Err(AppConfigError::invalid("live.session", "timeouts must be non-zero"));
        }
        if self.upload.max_bytes == 0 {
            return Err(AppConfigError::invalid("upload", "max_bytes must be non-zero"));
        }
        self.rate_limit
            .validate()
            .map_err(|reason| AppConfigError::invalid("rate_limit", reason))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.alerts.cooldown_seconds, 10.0);
        assert_eq!(config.history.capacity, 50);
        assert_eq!(config.live.sampling.interval_ms, 2_000);
        assert_eq!(config.backend.batch_url(), "http://127.0.0.1:8000/predict");
        assert_eq!(config.upload.max_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_cooldown_rejected() {
        let mut config = AppConfig::default();
        config.alerts.cooldown_seconds = -1.0;
        assert!(matches!(
            config.validate(),
            Err(AppConfigError::Invalid { section: "alerts", .. })
        ));
    }

    #[test]
    fn test_huge_alert_windows_rejected() {
        let mut config = AppConfig::default();
        config.alerts.cooldown_seconds = 1e20;
        assert!(matches!(
            config.validate(),
            Err(AppConfigError::Invalid { section: "alerts", .. })
        ));

        let mut config = AppConfig::default();
        config.alerts.alert_duration_seconds = 1e20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capacity_bounds() {
        let mut config = AppConfig::default();
        config.history.capacity = 101;
        assert!(config.validate().is_err());
        config.history.capacity = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_layer() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[alerts]\ncooldown_seconds = 3.5\nauto_acknowledge = true\n\n[history]\ncapacity = 80\n\n[live]\nenabled = true\nlocation = \"Bay 2\""
        )
        .unwrap();

        let config = AppConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.alerts.cooldown_seconds, 3.5);
        assert!(config.alerts.auto_acknowledge);
        assert_eq!(config.alerts.alert_duration_seconds, 5.0);
        assert_eq!(config.history.capacity, 80);
        assert!(config.live.enabled);
        assert_eq!(config.live.location.as_deref(), Some("Bay 2"));
    }

    #[test]
    fn test_file_layer_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[live.sampling]\ninterval_ms = 0").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path().to_str().unwrap()),
            Err(AppConfigError::Invalid { section: "live.sampling", .. })
        ));
    }
}
