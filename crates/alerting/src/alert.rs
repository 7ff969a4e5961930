//! Alert model

use chrono::{DateTime, Utc};
use result_router::{DetectionResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Alert severity, derived from detection confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// `high` at 0.8 and above, `medium` at 0.5 and above, else `low`
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Severity::High
        } else if confidence >= 0.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the triggering detection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertSource {
    Live,
    Upload,
    AdminUpload,
}

impl AlertSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSource::Live => "live",
            AlertSource::Upload => "upload",
            AlertSource::AdminUpload => "adminUpload",
        }
    }
}

/// Descriptive context attached by the producer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMetadata {
    /// Camera or site label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Uploaded file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Authenticated user that produced the detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
}

/// A deduplicated, user-facing accident alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source: AlertSource,
    pub severity: Severity,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub dismissed: bool,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub detection: DetectionResult,
    #[serde(default)]
    pub metadata: AlertMetadata,
}

impl Alert {
    /// Create an alert for `detection` with a fresh id
    pub fn new(detection: DetectionResult, source: AlertSource, metadata: AlertMetadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            source,
            severity: Severity::from_confidence(detection.confidence()),
            acknowledged: false,
            acknowledged_at: None,
            dismissed: false,
            dismissed_at: None,
            detection,
            metadata,
        }
    }

    /// Neither acknowledged nor dismissed
    pub fn is_active(&self) -> bool {
        !self.acknowledged && !self.dismissed
    }

    /// Mark acknowledged. Returns `false` if it already was.
    pub fn acknowledge(&mut self, at: DateTime<Utc>) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_at = Some(at);
        true
    }

    /// Mark dismissed. Returns `false` if it already was.
    pub fn dismiss(&mut self, at: DateTime<Utc>) -> bool {
        if self.dismissed {
            return false;
        }
        self.dismissed = true;
        self.dismissed_at = Some(at);
        true
    }

    /// Check the alert is fit for history
    pub fn validate(&self) -> Result<(), ValidationError> {
        if Uuid::parse_str(&self.id).is_err() {
            return Err(ValidationError::Invalid {
                field: "id",
                reason: format!("`{}` is not a UUID", self.id),
            });
        }
        if !self.detection.accident_detected() {
            return Err(ValidationError::Invalid {
                field: "detection",
                reason: "alert raised for a non-accident result".to_string(),
            });
        }
        if self.severity != Severity::from_confidence(self.detection.confidence()) {
            return Err(ValidationError::Invalid {
                field: "severity",
                reason: format!(
                    "{} does not match confidence {:.2}",
                    self.severity,
                    self.detection.confidence()
                ),
            });
        }
        if self.acknowledged != self.acknowledged_at.is_some() {
            return Err(ValidationError::Invalid {
                field: "acknowledgedAt",
                reason: "inconsistent with acknowledged flag".to_string(),
            });
        }
        if self.dismissed != self.dismissed_at.is_some() {
            return Err(ValidationError::Invalid {
                field: "dismissedAt",
                reason: "inconsistent with dismissed flag".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detection(confidence: f64) -> DetectionResult {
        DetectionResult::new(1, true, confidence, "accident", 0.1).unwrap()
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(Severity::from_confidence(0.79), Severity::Medium);
        assert_eq!(Severity::from_confidence(0.80), Severity::High);
        assert_eq!(Severity::from_confidence(0.49), Severity::Low);
        assert_eq!(Severity::from_confidence(0.50), Severity::Medium);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut alert = Alert::new(detection(0.9), AlertSource::Live, AlertMetadata::default());
        let first = Utc::now();
        assert!(alert.acknowledge(first));
        assert!(!alert.acknowledge(first + chrono::Duration::seconds(5)));
        assert_eq!(alert.acknowledged_at, Some(first));
        assert!(!alert.is_active());
    }

    #[test]
    fn test_dismiss_is_idempotent() {
        let mut alert = Alert::new(detection(0.6), AlertSource::Upload, AlertMetadata::default());
        assert!(alert.dismiss(Utc::now()));
        assert!(!alert.dismiss(Utc::now()));
        assert!(alert.dismissed_at.is_some());
    }

    #[test]
    fn test_validate() {
        let alert = Alert::new(detection(0.9), AlertSource::Live, AlertMetadata::default());
        assert!(alert.validate().is_ok());

        let mut bad_id = alert.clone();
        bad_id.id = "alert-1".to_string();
        assert!(bad_id.validate().is_err());

        let mut bad_severity = alert.clone();
        bad_severity.severity = Severity::Low;
        assert!(bad_severity.validate().is_err());

        let normal = DetectionResult::new(2, false, 0.9, "normal", 0.1).unwrap();
        let not_accident = Alert::new(normal, AlertSource::Live, AlertMetadata::default());
        assert!(not_accident.validate().is_err());
    }

    #[test]
    fn test_source_wire_names() {
        assert_eq!(serde_json::to_string(&AlertSource::AdminUpload).unwrap(), "\"adminUpload\"");
        let alert = Alert::new(detection(0.85), AlertSource::Live, AlertMetadata::default());
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["source"], "live");
        assert_eq!(json["acknowledgedAt"], serde_json::Value::Null);
    }

    proptest! {
        #[test]
        fn prop_severity_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(Severity::from_confidence(lo) <= Severity::from_confidence(hi));
        }
    }
}
