//! Batch inference client for uploaded files

use crate::config::BackendConfig;
use reqwest::multipart::{Form, Part};
use result_router::{parse_detection_value, DetectionResult, RouterError};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("Batch request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Unusable backend response: {0}")]
    Response(#[from] RouterError),
}

/// Posts one file to the batch endpoint and parses the single result
#[derive(Debug, Clone)]
pub struct BatchClient {
    client: reqwest::Client,
    url: String,
}

impl BatchClient {
    pub fn new(config: &BackendConfig) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.batch_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn classify(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<DetectionResult, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::EmptyFile);
        }
        let size = bytes.len();
        let mut part = Part::bytes(bytes).file_name(filename.to_string());
        if let Some(content_type) = content_type {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new().part("file", part);

        debug!("Posting {} ({} bytes) to {}", filename, size, self.url);
        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        let result = parse_detection_value(&value)?;
        info!(
            "Batch result for {}: accident={} confidence={:.2}",
            filename,
            result.accident_detected(),
            result.confidence()
        );
        Ok(result)
    }
}
