//! Inbound message parsing

use crate::{DetectionResult, RouterError, ValidationError};
use serde::Deserialize;
use serde_json::Value;

/// Non-result frames that keep the stream alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    ConnectionEstablished,
    Ping,
    Pong,
    Keepalive,
}

/// A parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlKind),
    Result(DetectionResult),
}

/// Result payload as sent by the backend. The streaming endpoint uses
/// camelCase; the batch endpoint uses snake_case.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    #[serde(alias = "accident_detected")]
    accident_detected: bool,
    confidence: f64,
    #[serde(default, alias = "frame_id")]
    frame_id: Option<u64>,
    #[serde(default, alias = "predicted_class")]
    predicted_class: Option<String>,
    #[serde(default, alias = "processing_time_seconds", alias = "processing_time")]
    processing_time_seconds: Option<f64>,
}

/// Parse one inbound text message
pub fn parse_message(text: &str) -> Result<Inbound, RouterError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RouterError::Malformed(e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(RouterError::Malformed("expected a JSON object".to_string()));
    };

    if let Some(kind) = object.get("type") {
        let kind = kind
            .as_str()
            .ok_or_else(|| RouterError::Malformed("`type` must be a string".to_string()))?;
        match kind {
            "connection_established" | "connected" => {
                return Ok(Inbound::Control(ControlKind::ConnectionEstablished))
            }
            "ping" => return Ok(Inbound::Control(ControlKind::Ping)),
            "pong" => return Ok(Inbound::Control(ControlKind::Pong)),
            "keepalive" | "heartbeat" => return Ok(Inbound::Control(ControlKind::Keepalive)),
            "error" => {
                let message = object
                    .get("message")
                    .or_else(|| object.get("detail"))
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified");
                return Err(RouterError::Backend(message.to_string()));
            }
            "result" | "detection" => {}
            other => return Err(RouterError::UnknownType(other.to_string())),
        }
    }

    let wire = decode(&value)?;
    let frame_id = wire
        .frame_id
        .ok_or(ValidationError::MissingField("frameId"))?;
    Ok(Inbound::Result(into_result(wire, frame_id)?))
}

/// Parse a batch inference response. Batch results carry no frame id and
/// are assigned frame id 0.
pub fn parse_detection_value(value: &Value) -> Result<DetectionResult, RouterError> {
    let wire = decode(value)?;
    let frame_id = wire.frame_id.unwrap_or(0);
    into_result(wire, frame_id)
}

fn decode(value: &Value) -> Result<WireResult, RouterError> {
    WireResult::deserialize(value).map_err(|e| RouterError::Malformed(e.to_string()))
}

fn into_result(wire: WireResult, frame_id: u64) -> Result<DetectionResult, RouterError> {
    let predicted_class = wire.predicted_class.unwrap_or_else(|| {
        if wire.accident_detected {
            "accident".to_string()
        } else {
            "normal".to_string()
        }
    });
    Ok(DetectionResult::new(
        frame_id,
        wire.accident_detected,
        wire.confidence,
        predicted_class,
        wire.processing_time_seconds.unwrap_or(0.0),
    )?)
}
