//! In-flight frame tracking

use result_router::FrameLedger;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Frame-id allocator plus a bounded queue of one outstanding submission.
///
/// Ids increase strictly and are never reused, so a late reply addressed to
/// a superseded session can never match a new submission.
#[derive(Debug)]
pub struct InFlightLedger {
    next_frame_id: u64,
    outstanding: Option<(u64, Instant)>,
    response_timeout: Duration,
}

impl InFlightLedger {
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            next_frame_id: 1,
            outstanding: None,
            response_timeout,
        }
    }

    /// Outstanding frame id, if any. An outstanding submission older than the
    /// response timeout is released first.
    pub fn outstanding(&mut self) -> Option<u64> {
        if let Some((frame_id, submitted_at)) = self.outstanding {
            if submitted_at.elapsed() >= self.response_timeout {
                warn!(
                    "No result for frame {} after {:?}, releasing slot",
                    frame_id, self.response_timeout
                );
                self.outstanding = None;
            }
        }
        self.outstanding.map(|(id, _)| id)
    }

    /// Claim the slot for a new submission. Returns `None` if busy.
    pub fn begin(&mut self) -> Option<u64> {
        if self.outstanding().is_some() {
            return None;
        }
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        self.outstanding = Some((frame_id, Instant::now()));
        Some(frame_id)
    }

    /// Release the slot for a submission that never left
    pub fn abort(&mut self, frame_id: u64) {
        if matches!(self.outstanding, Some((id, _)) if id == frame_id) {
            self.outstanding = None;
        }
    }

    /// Forget the outstanding submission (session replaced or sampling stopped)
    pub fn supersede(&mut self) {
        self.outstanding = None;
    }

    /// Id the next submission will get
    pub fn next_frame_id(&self) -> u64 {
        self.next_frame_id
    }
}

impl FrameLedger for InFlightLedger {
    fn resolve(&mut self, frame_id: u64) -> bool {
        match self.outstanding {
            Some((id, _)) if id == frame_id => {
                self.outstanding = None;
                true
            }
            _ => false,
        }
    }
}
