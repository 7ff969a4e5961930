//! Running statistics over routed results

use crate::{DetectionResult, ObserverError, ResultObserver};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Aggregate view of routed results
#[derive(Debug, Clone, Default)]
pub struct ResultTally {
    total: u64,
    accidents: u64,
    confidence_sum: f64,
    processing_sum: f64,
    last_frame_id: Option<u64>,
    last_result_at: Option<DateTime<Utc>>,
}

/// Serializable snapshot of a [`ResultTally`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TallySnapshot {
    pub total: u64,
    pub accidents: u64,
    pub normal: u64,
    pub mean_confidence: f64,
    pub mean_processing_seconds: f64,
    pub last_frame_id: Option<u64>,
    pub last_result_at: Option<DateTime<Utc>>,
}

impl ResultTally {
    pub fn record(&mut self, result: &DetectionResult) {
        self.total += 1;
        if result.accident_detected() {
            self.accidents += 1;
        }
        self.confidence_sum += result.confidence();
        self.processing_sum += result.processing_time_seconds();
        self.last_frame_id = Some(result.frame_id());
        self.last_result_at = Some(result.received_at());
    }

    pub fn snapshot(&self) -> TallySnapshot {
        let n = self.total.max(1) as f64;
        TallySnapshot {
            total: self.total,
            accidents: self.accidents,
            normal: self.total - self.accidents,
            mean_confidence: self.confidence_sum / n,
            mean_processing_seconds: self.processing_sum / n,
            last_frame_id: self.last_frame_id,
            last_result_at: self.last_result_at,
        }
    }
}

/// Tally shared between the router and read-only consumers
#[derive(Debug, Clone, Default)]
pub struct SharedTally(Arc<Mutex<ResultTally>>);

impl SharedTally {
    pub fn snapshot(&self) -> TallySnapshot {
        self.0.lock().map(|t| t.snapshot()).unwrap_or_default()
    }
}

impl ResultObserver for SharedTally {
    fn name(&self) -> &str {
        "tally"
    }

    fn observe(&mut self, result: &DetectionResult) -> Result<(), ObserverError> {
        let mut tally = self
            .0
            .lock()
            .map_err(|e| ObserverError(format!("Lock error: {}", e)))?;
        tally.record(result);
        Ok(())
    }
}
