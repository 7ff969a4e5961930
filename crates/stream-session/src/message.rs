//! Wire format for outbound frames

use chrono::{DateTime, Utc};
use frame_source::EncodedFrame;
use serde::Serialize;

/// Path of the live streaming endpoint on the backend
pub const STREAM_PATH: &str = "/live/stream";

/// Outbound frame submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMessage {
    /// Base64 encoded image
    pub frame: String,
    /// Submission time (ISO-8601)
    pub timestamp: DateTime<Utc>,
    /// Per-session frame id
    pub frame_id: u64,
}

impl FrameMessage {
    pub fn new(frame: &EncodedFrame, frame_id: u64) -> Self {
        Self {
            frame: frame.to_base64(),
            timestamp: Utc::now(),
            frame_id,
        }
    }
}

/// Build the streaming URL from a backend base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; a base that already uses a
/// websocket scheme is kept as is.
pub fn stream_url(backend: &str) -> String {
    let base = backend.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{}", base)
    };
    format!("{}{}", base, STREAM_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_source::ImageEncoding;

    #[test]
    fn test_stream_url_schemes() {
        assert_eq!(stream_url("http://localhost:8000"), "ws://localhost:8000/live/stream");
        assert_eq!(stream_url("https://api.example.com/"), "wss://api.example.com/live/stream");
        assert_eq!(stream_url("ws://10.0.0.2:9000"), "ws://10.0.0.2:9000/live/stream");
        assert_eq!(stream_url("backend:8000"), "ws://backend:8000/live/stream");
    }

    #[test]
    fn test_frame_message_wire_names() {
        let frame = EncodedFrame {
            bytes: vec![1, 2, 3],
            encoding: ImageEncoding::Jpeg,
            width: 1,
            height: 1,
            captured_at: Utc::now(),
        };
        let json = serde_json::to_value(FrameMessage::new(&frame, 42)).unwrap();
        assert_eq!(json["frameId"], 42);
        assert_eq!(json["frame"], "AQID");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
