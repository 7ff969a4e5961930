//! Upload route: batch inference for a single file

use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use alerting::{Alert, AlertMetadata, AlertSource};
use result_router::DetectionResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::upload::UploadError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Upload made from the admin console
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub result: DetectionResult,
    /// Set when the result raised a new alert
    pub alert: Option<Alert>,
    /// Accident detected but inside the cooldown window
    pub suppressed: bool,
}

fn error(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
        .into_response()
}

/// 413 when the body limit was hit, 400 for malformed multipart
fn multipart_error(e: MultipartError) -> Response {
    warn!("Rejected upload body: {}", e.body_text());
    error(e.status(), e.body_text())
}

struct UploadedFile {
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Classify an uploaded file and raise an alert for accidents
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let Some(batch) = &state.batch else {
        return error(StatusCode::SERVICE_UNAVAILABLE, "batch inference not configured");
    };

    let mut file = None;
    let mut location = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_error(e),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => {
                        file = Some(UploadedFile {
                            filename,
                            content_type,
                            bytes: bytes.to_vec(),
                        })
                    }
                    Err(e) => return multipart_error(e),
                }
            }
            Some("location") => location = field.text().await.ok(),
            _ => {}
        }
    }
    let Some(file) = file else {
        return error(StatusCode::BAD_REQUEST, "missing `file` field");
    };

    let result = match batch
        .classify(&file.filename, file.content_type.as_deref(), file.bytes)
        .await
    {
        Ok(result) => result,
        Err(e @ UploadError::EmptyFile) => return error(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            warn!("Batch inference failed for {}: {}", file.filename, e);
            return error(StatusCode::BAD_GATEWAY, e);
        }
    };

    if !result.accident_detected() {
        state.service.notify_completion(&result);
        return Json(UploadResponse {
            result,
            alert: None,
            suppressed: false,
        })
        .into_response();
    }

    let source = if query.admin {
        AlertSource::AdminUpload
    } else {
        AlertSource::Upload
    };
    let metadata = AlertMetadata {
        location,
        filename: Some(file.filename),
        reported_by: super::reported_by(&headers),
    };
    let admitted = state.service.report(result.clone(), source, metadata);
    let suppressed = admitted.is_none();
    Json(UploadResponse {
        result,
        alert: admitted.map(|a| a.alert),
        suppressed,
    })
    .into_response()
}
