//! HTTP route handlers

pub mod alerts;
pub mod live;
pub mod uploads;

use axum::http::HeaderMap;

/// Header carrying the authenticated user, set by the fronting auth proxy
pub const USER_HEADER: &str = "x-user";

pub(crate) fn reported_by(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
}
