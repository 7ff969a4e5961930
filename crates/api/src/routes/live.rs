//! Live pipeline routes

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::pipeline::LiveCommand;
use crate::AppState;

/// Current live session status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    match &state.live {
        Some(live) => {
            let status = live.status.borrow().clone();
            let mut body = serde_json::to_value(status).unwrap_or_else(|_| json!({}));
            if let Some(object) = body.as_object_mut() {
                object.insert("enabled".to_string(), json!(true));
            }
            Json(body)
        }
        None => Json(json!({ "enabled": false })),
    }
}

/// Reopen an abandoned or closed stream
pub async fn reconnect(State(state): State<Arc<AppState>>) -> StatusCode {
    let Some(live) = &state.live else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };
    match live.commands.send(LiveCommand::Reconnect).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
