//! Sampling scheduler implementation

use crate::ledger::InFlightLedger;
use crate::SchedulerError;
use frame_source::{CaptureError, FrameSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stream_session::{FrameMessage, StreamSession};
use tracing::{debug, info, warn};

/// Configuration for the sampling scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sampling period in milliseconds (default: 2000)
    pub interval_ms: u64,
    /// Release an unanswered submission after this long (milliseconds)
    pub response_timeout_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            response_timeout_ms: 10_000,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.interval_ms == 0 {
            return Err(SchedulerError::ZeroInterval);
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Result of one sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Scheduler not running
    Stopped,
    /// Session not open; tick skipped
    SessionNotOpen,
    /// Previous submission still outstanding; tick skipped
    Busy(u64),
    /// Frame submitted with this id
    Submitted(u64),
    /// Frame source failed
    CaptureFailed,
    /// Session refused the payload
    SendFailed,
}

/// Tick counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub skipped_not_open: u64,
    pub skipped_busy: u64,
    pub capture_failures: u64,
    pub send_failures: u64,
}

/// Periodic frame sampler.
///
/// Missed ticks are not queued: a tick that cannot submit is simply a gap in
/// sampling.
pub struct SamplingScheduler<S: FrameSource> {
    config: SamplingConfig,
    source: S,
    ledger: InFlightLedger,
    running: bool,
    stats: SchedulerStats,
}

impl<S: FrameSource> SamplingScheduler<S> {
    pub fn new(config: SamplingConfig, source: S) -> Self {
        let ledger = InFlightLedger::new(Duration::from_millis(config.response_timeout_ms));
        info!("Sampling scheduler created, period {}ms", config.interval_ms);
        Self {
            config,
            source,
            ledger,
            running: false,
            stats: SchedulerStats::default(),
        }
    }

    /// Sampling period
    pub fn interval(&self) -> Duration {
        self.config.interval()
    }

    /// Start sampling. No-op if already running.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.running {
            debug!("Sampling scheduler already running");
            return Ok(());
        }
        self.source.open()?;
        self.running = true;
        info!("Sampling scheduler started");
        Ok(())
    }

    /// Stop sampling and release the frame source. No-op if stopped.
    ///
    /// An in-flight submission is not cancelled; its reply will no longer
    /// match the ledger and is dropped as stale.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.ledger.supersede();
        self.source.release();
        info!("Sampling scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The session was replaced; outstanding submissions belong to the old one
    pub fn session_replaced(&mut self) {
        self.ledger.supersede();
    }

    /// Ledger used by the router to correlate replies
    pub fn ledger_mut(&mut self) -> &mut InFlightLedger {
        &mut self.ledger
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Run one sampling tick against `session`
    pub fn tick(&mut self, session: &StreamSession) -> TickOutcome {
        if !self.running {
            return TickOutcome::Stopped;
        }

        if !session.is_open() {
            self.stats.skipped_not_open += 1;
            debug!("Session {}, skipping tick", session.state());
            return TickOutcome::SessionNotOpen;
        }

        if let Some(frame_id) = self.ledger.outstanding() {
            self.stats.skipped_busy += 1;
            debug!("Frame {} still in flight, skipping tick", frame_id);
            return TickOutcome::Busy(frame_id);
        }

        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.capture_failures += 1;
                warn!("Frame capture failed: {}", e);
                return TickOutcome::CaptureFailed;
            }
        };

        let Some(frame_id) = self.ledger.begin() else {
            self.stats.skipped_busy += 1;
            return TickOutcome::Busy(self.ledger.next_frame_id().saturating_sub(1));
        };

        if session.send(&FrameMessage::new(&frame, frame_id)) {
            self.stats.submitted += 1;
            debug!("Submitted frame {} ({} bytes)", frame_id, frame.len());
            TickOutcome::Submitted(frame_id)
        } else {
            self.ledger.abort(frame_id);
            self.stats.send_failures += 1;
            warn!("Session refused frame {}", frame_id);
            TickOutcome::SendFailed
        }
    }
}
