//! In-app banner channel

use crate::{ChannelError, NotificationChannel};
use alerting::Alert;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Why a banner went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    Acknowledged,
    Dismissed,
    Expired,
    /// A newer alert took its place
    Replaced,
}

/// Banner lifecycle events for UI subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BannerEvent {
    Shown { alert: Alert },
    Closed { id: String, reason: CloseReason },
}

#[derive(Default)]
struct Banner {
    current: Option<Alert>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    banner: Mutex<Banner>,
    events: broadcast::Sender<BannerEvent>,
    auto_close: Option<Duration>,
}

/// Shows at most one alert at a time
#[derive(Clone)]
pub struct InAppChannel {
    inner: Arc<Inner>,
}

impl InAppChannel {
    /// `auto_close` expires each banner after the given duration
    pub fn new(auto_close: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                banner: Mutex::new(Banner::default()),
                events,
                auto_close,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BannerEvent> {
        self.inner.events.subscribe()
    }

    /// Alert currently on screen
    pub fn current(&self) -> Option<Alert> {
        self.inner
            .banner
            .lock()
            .ok()
            .and_then(|banner| banner.current.clone())
    }

    fn emit(&self, event: BannerEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Put `alert` on screen, replacing whatever was there
    pub fn show(&self, alert: &Alert) {
        let Ok(mut banner) = self.inner.banner.lock() else {
            return;
        };
        if let Some(timer) = banner.timer.take() {
            timer.abort();
        }
        if let Some(previous) = banner.current.take() {
            self.emit(BannerEvent::Closed {
                id: previous.id,
                reason: CloseReason::Replaced,
            });
        }

        banner.current = Some(alert.clone());
        self.emit(BannerEvent::Shown {
            alert: alert.clone(),
        });

        if let Some(delay) = self.inner.auto_close {
            let channel = self.clone();
            let id = alert.id.clone();
            banner.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                channel.close(&id, CloseReason::Expired);
            }));
        }
    }

    /// Close the banner if it is showing `id`. Returns `false` otherwise.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let Ok(mut banner) = self.inner.banner.lock() else {
            return false;
        };
        if banner.current.as_ref().map(|a| a.id.as_str()) != Some(id) {
            return false;
        }
        banner.current = None;
        if let Some(timer) = banner.timer.take() {
            if reason != CloseReason::Expired {
                timer.abort();
            }
        }
        debug!("Banner for {} closed ({:?})", id, reason);
        self.emit(BannerEvent::Closed {
            id: id.to_string(),
            reason,
        });
        true
    }
}

impl NotificationChannel for InAppChannel {
    fn name(&self) -> &'static str {
        "in_app"
    }

    fn notify<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), ChannelError>> {
        self.show(alert);
        Box::pin(async { Ok(()) })
    }
}
