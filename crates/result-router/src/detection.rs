//! Detection result

use crate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inference outcome for a single frame or file.
///
/// Immutable once constructed; confidence is always within [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "DetectionRecord")]
pub struct DetectionResult {
    frame_id: u64,
    accident_detected: bool,
    confidence: f64,
    predicted_class: String,
    processing_time_seconds: f64,
    received_at: DateTime<Utc>,
}

/// Unchecked serialized form
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectionRecord {
    frame_id: u64,
    accident_detected: bool,
    confidence: f64,
    predicted_class: String,
    processing_time_seconds: f64,
    received_at: DateTime<Utc>,
}

impl TryFrom<DetectionRecord> for DetectionResult {
    type Error = ValidationError;

    fn try_from(record: DetectionRecord) -> Result<Self, Self::Error> {
        let mut result = DetectionResult::new(
            record.frame_id,
            record.accident_detected,
            record.confidence,
            record.predicted_class,
            record.processing_time_seconds,
        )?;
        result.received_at = record.received_at;
        Ok(result)
    }
}

impl DetectionResult {
    /// Build a result stamped with the current time
    pub fn new(
        frame_id: u64,
        accident_detected: bool,
        confidence: f64,
        predicted_class: impl Into<String>,
        processing_time_seconds: f64,
    ) -> Result<Self, ValidationError> {
        if !confidence.is_finite() {
            return Err(ValidationError::NotFinite("confidence"));
        }
        if !processing_time_seconds.is_finite() {
            return Err(ValidationError::NotFinite("processingTimeSeconds"));
        }
        if processing_time_seconds < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "processingTimeSeconds",
                value: processing_time_seconds,
                min: 0.0,
                max: f64::MAX,
            });
        }
        let predicted_class = predicted_class.into();
        if predicted_class.trim().is_empty() {
            return Err(ValidationError::Invalid {
                field: "predictedClass",
                reason: "empty".to_string(),
            });
        }

        Ok(Self {
            frame_id,
            accident_detected,
            confidence: confidence.clamp(0.0, 1.0),
            predicted_class,
            processing_time_seconds,
            received_at: Utc::now(),
        })
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn accident_detected(&self) -> bool {
        self.accident_detected
    }

    /// Confidence in [0, 1]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn predicted_class(&self) -> &str {
        &self.predicted_class
    }

    pub fn processing_time_seconds(&self) -> f64 {
        self.processing_time_seconds
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
