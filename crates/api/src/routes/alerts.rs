//! Alert Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use alerting::Alert;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::service::AlertStats;
use crate::AppState;

/// Query parameters for the alerts endpoint
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Filter by severity (low, medium, high)
    pub severity: Option<String>,
    /// Filter by acknowledged status
    pub acknowledged: Option<bool>,
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response for alert listings
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub data: Vec<Alert>,
    pub count: usize,
    pub unacknowledged_count: usize,
}

/// Result of an acknowledge or dismiss request
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub id: String,
    /// `false` when the alert was already in that state
    pub changed: bool,
    pub alert: Alert,
}

/// List alerts, newest first
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> Json<AlertResponse> {
    let alerts = state.service.list();
    let unacknowledged_count = alerts.iter().filter(|a| !a.acknowledged).count();

    let data: Vec<Alert> = alerts
        .into_iter()
        .filter(|a| {
            params
                .severity
                .as_deref()
                .map_or(true, |s| a.severity.as_str().eq_ignore_ascii_case(s))
        })
        .filter(|a| params.acknowledged.map_or(true, |ack| a.acknowledged == ack))
        .take(params.limit)
        .collect();

    Json(AlertResponse {
        count: data.len(),
        unacknowledged_count,
        data,
    })
}

/// Alerts neither acknowledged nor dismissed
pub async fn get_active(State(state): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    Json(
        state
            .service
            .list()
            .into_iter()
            .filter(Alert::is_active)
            .collect(),
    )
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<AlertStats> {
    Json(state.service.stats())
}

pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.service.activate_audio();
    let changed = state.service.acknowledge(&id);
    action_response(&state, id, changed)
}

pub async fn dismiss(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.service.activate_audio();
    let changed = state.service.dismiss(&id);
    action_response(&state, id, changed)
}

fn action_response(state: &AppState, id: String, changed: bool) -> axum::response::Response {
    match state.service.get(&id) {
        Some(alert) => Json(ActionResponse { id, changed, alert }).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("alert {} not found", id) })),
        )
            .into_response(),
    }
}

/// Clear the whole history
pub async fn clear(State(state): State<Arc<AppState>>) -> StatusCode {
    state.service.clear();
    StatusCode::NO_CONTENT
}
