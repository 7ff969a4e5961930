//! Accident Alert Service
//!
//! Wires the live pipeline, the upload path and the alert history behind a
//! REST API.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod pipeline;
pub mod rate_limit;
mod routes;
pub mod service;
pub mod upload;

pub use config::{AppConfig, AppConfigError, LoggingConfig, UploadConfig};
pub use pipeline::{LiveCommand, LiveHandle, LivePipeline, LiveStatus};
pub use routes::USER_HEADER;
pub use service::{Admitted, AlertService, AlertStats, Channels};
pub use upload::{BatchClient, UploadError};

use alert_history::{AlertHistoryStore, FileSlot, HistoryConfig, InProcessBus, KeyValueSlot, MemorySlot, StorageError};
use alerting::ConfigError;
use frame_source::{CaptureError, FrameSource};
use notification::{AudioChannel, CommandAudioBackend, DesktopChannel, InAppChannel, NotifySendBackend};
use rate_limit::{create_governor_config, RateLimitConfig};
use sampling_scheduler::SamplingScheduler;
use stream_session::{stream_url, Connector, SessionState, StreamSession};

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<AlertService>,
    /// Batch inference client for uploads
    pub batch: Option<BatchClient>,
    /// Present when live monitoring is enabled
    pub live: Option<LiveHandle>,
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(service: Arc<AlertService>) -> Self {
        Self {
            service,
            batch: None,
            live: None,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_batch(mut self, batch: BatchClient) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_live(mut self, live: LiveHandle) -> Self {
        self.live = Some(live);
        self
    }

    pub fn with_metrics(mut self, metrics: PrometheusHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    pub metrics: SystemMetrics,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub stream: ComponentHealth,
    pub history: ComponentHealth,
    pub batch: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn new(status: &str, detail: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            detail,
        }
    }
}

/// Alert counters
#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub alert_count: usize,
    pub active_alerts: usize,
    pub frames_submitted: u64,
}

/// Create the application router
pub fn create_router(
    state: Arc<AppState>,
    rate_limit: &RateLimitConfig,
    upload: &UploadConfig,
) -> Router {
    let uploads = Router::new()
        .route("/api/v1/uploads", post(routes::uploads::upload))
        .layer(DefaultBodyLimit::max(upload.max_bytes));
    let uploads = match create_governor_config(rate_limit) {
        Some(config) => uploads.layer(GovernorLayer { config }),
        None => uploads,
    };

    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route(
            "/api/v1/alerts",
            get(routes::alerts::get_alerts).delete(routes::alerts::clear),
        )
        .route("/api/v1/alerts/stats", get(routes::alerts::get_stats))
        .route("/api/v1/alerts/active", get(routes::alerts::get_active))
        .route(
            "/api/v1/alerts/:id/acknowledge",
            post(routes::alerts::acknowledge),
        )
        .route("/api/v1/alerts/:id/dismiss", post(routes::alerts::dismiss))
        .route("/api/v1/live/status", get(routes::live::get_status))
        .route("/api/v1/live/reconnect", post(routes::live::reconnect))
        .route("/metrics", get(metrics_handler))
        .merge(uploads)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let (stream, frames_submitted) = match &state.live {
        Some(live) => {
            let status = live.status.borrow();
            let health = if status.state == SessionState::Open {
                ComponentHealth::new("ok", None)
            } else {
                ComponentHealth::new("degraded", Some(status.state.to_string()))
            };
            (health, status.scheduler.submitted)
        }
        None => (ComponentHealth::new("disabled", None), 0),
    };
    let batch = match &state.batch {
        Some(client) => ComponentHealth::new("ok", Some(client.url().to_string())),
        None => ComponentHealth::new("disabled", None),
    };

    let stats = state.service.history().stats();
    let status = if stream.status == "degraded" {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            stream,
            history: ComponentHealth::new("ok", Some(format!("{} alerts", stats.total))),
            batch,
        },
        metrics: SystemMetrics {
            alert_count: stats.total,
            active_alerts: stats.active,
            frames_submitted,
        },
    })
}

/// Prometheus exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = config.level().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Open the alert history with the configured slot
pub fn build_history(config: &HistoryConfig) -> Result<Arc<AlertHistoryStore>, StorageError> {
    let slot: Arc<dyn KeyValueSlot> = match &config.data_dir {
        Some(dir) => Arc::new(FileSlot::new(dir)?),
        None => {
            info!("No history data_dir configured, alerts will not survive restarts");
            Arc::new(MemorySlot::new())
        }
    };
    let store = AlertHistoryStore::open(config, slot, Arc::new(InProcessBus::default()))?;
    Ok(Arc::new(store))
}

/// Build the alert service and its notification channels
pub fn build_service(
    config: &AppConfig,
    history: Arc<AlertHistoryStore>,
) -> Result<Arc<AlertService>, ConfigError> {
    config.alerts.validate()?;
    let notifications = &config.notifications;

    let mut audio = AudioChannel::new(Some(Arc::new(CommandAudioBackend::new(
        notifications.audio_player.as_str(),
    ))));
    if notifications.require_audio_activation {
        audio = audio.requiring_activation();
    }
    let desktop = DesktopChannel::new(Arc::new(NotifySendBackend::new(
        notifications.notify_program.as_str(),
    )));
    let auto_close = config
        .alerts
        .auto_acknowledge
        .then(|| config.alerts.alert_duration());

    let channels = Channels {
        audio: Arc::new(audio),
        desktop: Arc::new(desktop),
        in_app: InAppChannel::new(auto_close),
    };
    AlertService::new(config.alerts.clone(), &notifications.channels, history, channels)
}

/// Start the live pipeline on its own task
pub fn spawn_live(
    config: &AppConfig,
    service: Arc<AlertService>,
    connector: Arc<dyn Connector>,
    shutdown: watch::Receiver<bool>,
) -> Result<(LiveHandle, JoinHandle<Result<(), CaptureError>>), CaptureError> {
    let source = config.live.source.build()?;
    let (pipeline, handle) = live_pipeline(config, source, service, connector);
    let task = tokio::spawn(pipeline.run(shutdown));
    Ok((handle, task))
}

/// Assemble a live pipeline around `source`
pub fn live_pipeline<S: FrameSource>(
    config: &AppConfig,
    source: S,
    service: Arc<AlertService>,
    connector: Arc<dyn Connector>,
) -> (LivePipeline<S>, LiveHandle) {
    let scheduler = SamplingScheduler::new(config.live.sampling.clone(), source);
    let session = StreamSession::new(config.live.session.clone(), connector);
    LivePipeline::new(
        session,
        scheduler,
        config.live.backoff.clone(),
        service,
        stream_url(&config.backend.url),
        config.live.location.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{accident, service_with};
    use crate::upload::tests::fake_backend;
    use alerting::{AlertConfig, AlertMetadata, AlertSource};
    use axum::body::{to_bytes, Body};
    use axum::extract::ConnectInfo;
    use axum::http::Request;
    use serde_json::Value;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    const BOUNDARY: &str = "alertd-upload-boundary";

    fn app(service: Arc<AlertService>) -> Router {
        create_router(
            Arc::new(AppState::new(service)),
            &RateLimitConfig::default(),
            &UploadConfig::default(),
        )
    }

    async fn upload_app(service: Arc<AlertService>, upload: UploadConfig) -> Router {
        let batch = BatchClient::new(&fake_backend().await).unwrap();
        create_router(
            Arc::new(AppState::new(service).with_batch(batch)),
            &RateLimitConfig::default(),
            &upload,
        )
    }

    fn form(filename: &str, bytes: &[u8], location: Option<&str>) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
        if let Some(location) = location {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"location\"\r\n\r\n{location}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn post_upload(
        app: &Router,
        uri: &str,
        user: Option<&str>,
        body: Vec<u8>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("POST").uri(uri).header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        let mut request = builder.body(Body::from(body)).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 41_000))));
        send(app, request).await
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        send(app, request).await
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn seeded() -> (Arc<AlertService>, String) {
        let service = service_with(AlertConfig::default());
        let admitted = service
            .report(accident(0.92), AlertSource::Live, AlertMetadata::default())
            .unwrap();
        admitted.delivery.await.unwrap();
        (service, admitted.alert.id)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(service_with(AlertConfig::default()));
        let (status, body) = call(&app, "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["stream"]["status"], "disabled");
        assert_eq!(body["metrics"]["alert_count"], 0);
    }

    #[tokio::test]
    async fn test_list_and_filter() {
        let (service, id) = seeded().await;
        let app = app(service);

        let (status, body) = call(&app, "GET", "/api/v1/alerts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["unacknowledged_count"], 1);
        assert_eq!(body["data"][0]["id"], id.as_str());
        assert_eq!(body["data"][0]["severity"], "high");
        assert_eq!(body["data"][0]["source"], "live");

        let (_, body) = call(&app, "GET", "/api/v1/alerts?severity=low").await;
        assert_eq!(body["count"], 0);
        let (_, body) = call(&app, "GET", "/api/v1/alerts?acknowledged=false&limit=5").await;
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let (service, id) = seeded().await;
        let app = app(service);
        let uri = format!("/api/v1/alerts/{}/acknowledge", id);

        let (status, body) = call(&app, "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], true);
        let first = body["alert"]["acknowledgedAt"].clone();
        assert!(first.is_string());

        let (status, body) = call(&app, "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], false);
        assert_eq!(body["alert"]["acknowledgedAt"], first);

        let (_, body) = call(&app, "GET", "/api/v1/alerts/active").await;
        assert_eq!(body.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_unknown_alert_is_404() {
        let app = app(service_with(AlertConfig::default()));
        let (status, _) = call(&app, "POST", "/api/v1/alerts/nope/dismiss").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let (service, _) = seeded().await;
        let app = app(service);

        let (_, body) = call(&app, "GET", "/api/v1/alerts/stats").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["highSeverity"], 1);
        assert_eq!(body["bySource"]["live"], 1);
        assert_eq!(body["admitted"], 1);

        let (status, _) = call(&app, "DELETE", "/api/v1/alerts").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = call(&app, "GET", "/api/v1/alerts").await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_live_disabled() {
        let app = app(service_with(AlertConfig::default()));
        let (status, body) = call(&app, "GET", "/api/v1/live/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);

        let (status, _) = call(&app, "POST", "/api/v1/live/reconnect").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = call(&app, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_accident_then_cooldown() {
        let service = service_with(AlertConfig::default());
        let app = upload_app(Arc::clone(&service), UploadConfig::default()).await;

        let (status, body) = post_upload(
            &app,
            "/api/v1/uploads?admin=true",
            Some("dispatcher-7"),
            form("crash-cam2.jpg", &[0xFF, 0xD8, 0xFF, 0xD9], Some("Gate 3")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suppressed"], false);
        assert_eq!(body["result"]["accidentDetected"], true);
        let alert = &body["alert"];
        assert_eq!(alert["source"], "adminUpload");
        assert_eq!(alert["severity"], "high");
        assert_eq!(alert["metadata"]["reportedBy"], "dispatcher-7");
        assert_eq!(alert["metadata"]["location"], "Gate 3");
        assert_eq!(alert["metadata"]["filename"], "crash-cam2.jpg");

        let id = alert["id"].as_str().unwrap().to_string();
        let stored = service.get(&id).unwrap();
        assert_eq!(stored.source, AlertSource::AdminUpload);
        assert_eq!(stored.metadata.reported_by.as_deref(), Some("dispatcher-7"));

        let (status, body) = post_upload(
            &app,
            "/api/v1/uploads",
            None,
            form("crash-cam3.jpg", &[1, 2, 3], None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suppressed"], true);
        assert_eq!(body["alert"], Value::Null);
        assert_eq!(service.list().len(), 1);
        assert_eq!(service.stats().suppressed, 1);
    }

    #[tokio::test]
    async fn test_upload_shares_cooldown_with_live() {
        let service = service_with(AlertConfig::default());
        service
            .report(accident(0.9), AlertSource::Live, AlertMetadata::default())
            .unwrap();
        let app = upload_app(Arc::clone(&service), UploadConfig::default()).await;

        let (status, body) =
            post_upload(&app, "/api/v1/uploads", None, form("crash.jpg", &[1], None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suppressed"], true);
        assert_eq!(service.list().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_normal_result() {
        let service = service_with(AlertConfig::default());
        let app = upload_app(Arc::clone(&service), UploadConfig::default()).await;

        let (status, body) =
            post_upload(&app, "/api/v1/uploads", None, form("street.jpg", &[1, 2], None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["accidentDetected"], false);
        assert_eq!(body["alert"], Value::Null);
        assert_eq!(body["suppressed"], false);
        assert!(service.list().is_empty());
    }

    #[tokio::test]
    async fn test_upload_bad_input() {
        let app = upload_app(service_with(AlertConfig::default()), UploadConfig::default()).await;

        let (status, _) =
            post_upload(&app, "/api/v1/uploads", None, form("crash.jpg", &[], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing_file = format!("--{BOUNDARY}--\r\n").into_bytes();
        let (status, _) = post_upload(&app, "/api/v1/uploads", None, missing_file).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_body_limit() {
        let service = service_with(AlertConfig::default());
        let app = upload_app(Arc::clone(&service), UploadConfig { max_bytes: 64 * 1024 }).await;

        let (status, body) = post_upload(
            &app,
            "/api/v1/uploads",
            None,
            form("crash.jpg", &vec![7u8; 48 * 1024], None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alert"]["source"], "upload");

        let (status, _) = post_upload(
            &app,
            "/api/v1/uploads",
            None,
            form("crash.jpg", &vec![7u8; 80 * 1024], None),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(service.list().len(), 1);
    }

    #[test]
    fn test_default_upload_limit_above_axum_default() {
        assert!(UploadConfig::default().max_bytes > 2 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_build_service_rejects_huge_alert_duration() {
        let mut config = AppConfig::default();
        config.alerts.auto_acknowledge = true;
        config.alerts.alert_duration_seconds = 1e20;
        let history = build_history(&config.history).unwrap();
        assert!(matches!(
            build_service(&config, history),
            Err(ConfigError::InvalidAlertDuration(_))
        ));
    }

    #[test]
    fn test_build_history_with_file_slot() {
        let dir = tempfile::tempdir().unwrap();
        let config = HistoryConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let store = build_history(&config).unwrap();
        assert!(store.is_empty());
    }
}
