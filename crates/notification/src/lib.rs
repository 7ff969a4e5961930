//! Notification Fan-out
//!
//! Delivers each admitted alert to a set of independent channels. A channel
//! failing, lacking permission, or having no backend never affects the others.

mod audio;
mod desktop;
mod fanout;
mod history;
mod in_app;

pub use audio::{AudioBackend, AudioChannel, CommandAudioBackend, Tone, ToneSequence, SAMPLE_RATE};
pub use desktop::{
    DesktopChannel, DesktopNotification, DesktopNotifier, NotifySendBackend, Permission, Urgency,
    ACCIDENT_EXPIRY, INFO_EXPIRY,
};
pub use fanout::{ChannelReport, FanoutConfig, FanoutReport, NotificationFanout, Outcome};
pub use history::HistoryChannel;
pub use in_app::{BannerEvent, CloseReason, InAppChannel};

use alerting::Alert;
use futures_util::future::BoxFuture;
use thiserror::Error;

/// Channel errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("Permission not granted")]
    PermissionDenied,

    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// One way of telling the user about an alert
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), ChannelError>>;
}
