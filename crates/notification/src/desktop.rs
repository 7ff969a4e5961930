//! OS desktop notification channel

use crate::{ChannelError, NotificationChannel};
use alerting::{Alert, Severity};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long an accident notification stays up
pub const ACCIDENT_EXPIRY: Duration = Duration::from_secs(15);

/// How long an informational notification stays up
pub const INFO_EXPIRY: Duration = Duration::from_secs(8);

/// Desktop notification permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    NotRequested,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

impl Urgency {
    fn as_str(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// A dismissible notification that expires on its own
#[derive(Debug, Clone, PartialEq)]
pub struct DesktopNotification {
    /// Replaces an earlier notification with the same tag
    pub tag: String,
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    pub expires_after: Duration,
}

impl DesktopNotification {
    pub fn for_alert(alert: &Alert) -> Self {
        let mut body = format!(
            "{} severity, {:.0}% confidence",
            alert.severity,
            alert.detection.confidence() * 100.0
        );
        if let Some(location) = &alert.metadata.location {
            body.push_str(&format!(" at {}", location));
        }
        if let Some(filename) = &alert.metadata.filename {
            body.push_str(&format!(" ({})", filename));
        }
        Self {
            tag: alert.id.clone(),
            title: "Accident detected".to_string(),
            body,
            urgency: if alert.severity == Severity::High {
                Urgency::Critical
            } else {
                Urgency::Normal
            },
            expires_after: ACCIDENT_EXPIRY,
        }
    }

    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tag: "info".to_string(),
            title: title.into(),
            body: body.into(),
            urgency: Urgency::Normal,
            expires_after: INFO_EXPIRY,
        }
    }
}

/// Platform notification service
pub trait DesktopNotifier: Send + Sync {
    fn request_permission(&self) -> BoxFuture<'_, Permission>;

    fn show<'a>(&'a self, notification: &'a DesktopNotification) -> BoxFuture<'a, Result<(), ChannelError>>;
}

/// freedesktop notifications through `notify-send`
#[derive(Debug, Clone)]
pub struct NotifySendBackend {
    program: String,
    app_name: String,
}

impl NotifySendBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            app_name: "accident-alertd".to_string(),
        }
    }
}

impl Default for NotifySendBackend {
    fn default() -> Self {
        Self::new("notify-send")
    }
}

impl DesktopNotifier for NotifySendBackend {
    fn request_permission(&self) -> BoxFuture<'_, Permission> {
        Box::pin(async move {
            let check = Command::new(&self.program)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match check {
                Ok(status) if status.success() => Permission::Granted,
                Ok(status) => {
                    debug!("{} --version exited with {}", self.program, status);
                    Permission::Denied
                }
                Err(e) => {
                    debug!("{} unavailable: {}", self.program, e);
                    Permission::Denied
                }
            }
        })
    }

    fn show<'a>(&'a self, notification: &'a DesktopNotification) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            let status = Command::new(&self.program)
                .arg("-a")
                .arg(&self.app_name)
                .arg("-u")
                .arg(notification.urgency.as_str())
                .arg("-t")
                .arg(notification.expires_after.as_millis().to_string())
                .arg("-h")
                .arg(format!("string:x-canonical-private-synchronous:{}", notification.tag))
                .arg(&notification.title)
                .arg(&notification.body)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|e| match e.kind() {
                    ErrorKind::NotFound => ChannelError::Unavailable(e.to_string()),
                    _ => ChannelError::Failed(e.to_string()),
                })?;
            if status.success() {
                Ok(())
            } else {
                Err(ChannelError::Failed(format!("{} exited with {}", self.program, status)))
            }
        })
    }
}

/// Desktop notifications, inert until permission has been granted
pub struct DesktopChannel {
    notifier: Arc<dyn DesktopNotifier>,
    permission: Mutex<Permission>,
}

impl DesktopChannel {
    pub fn new(notifier: Arc<dyn DesktopNotifier>) -> Self {
        Self {
            notifier,
            permission: Mutex::new(Permission::NotRequested),
        }
    }

    pub fn permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|p| *p)
            .unwrap_or(Permission::Denied)
    }

    /// Ask once; later calls return the recorded answer
    pub async fn request_permission(&self) -> Permission {
        let current = self.permission();
        if current != Permission::NotRequested {
            return current;
        }
        let answer = self.notifier.request_permission().await;
        if let Ok(mut permission) = self.permission.lock() {
            *permission = answer;
        }
        info!("Desktop notification permission: {:?}", answer);
        answer
    }

    async fn show(&self, notification: &DesktopNotification) -> Result<(), ChannelError> {
        if self.permission() != Permission::Granted {
            return Err(ChannelError::PermissionDenied);
        }
        self.notifier.show(notification).await
    }

    /// Informational notification with the shorter expiry
    pub async fn notify_info(&self, title: &str, body: &str) {
        match self.show(&DesktopNotification::info(title, body)).await {
            Ok(()) | Err(ChannelError::PermissionDenied) => {}
            Err(e) => warn!("Informational notification failed: {}", e),
        }
    }
}

impl NotificationChannel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move { self.show(&DesktopNotification::for_alert(alert)).await })
    }
}
