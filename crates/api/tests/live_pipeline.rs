use alert_history::{AlertHistoryStore, ChangeKind};
use api::{build_history, build_service, live_pipeline, AlertService, AppConfig, LiveCommand, LiveHandle};
use frame_source::{ImageEncoding, SyntheticCamera};
use serde_json::{json, Value};
use std::sync::Arc;
use stream_session::mock::MockMode;
use stream_session::{MockBackend, MockConnector, MockLink, SessionState};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Harness {
    service: Arc<AlertService>,
    history: Arc<AlertHistoryStore>,
    connector: MockConnector,
    backend: MockBackend,
    live: LiveHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), frame_source::CaptureError>>,
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.alerts.cooldown_seconds = 0.0;
    config.notifications.channels.audio = false;
    config.notifications.channels.desktop = false;
    config.live.location = Some("Bay 2".to_string());
    config
}

fn start(config: AppConfig, mode: MockMode) -> Harness {
    let history = build_history(&config.history).unwrap();
    let service = build_service(&config, Arc::clone(&history)).unwrap();
    let (connector, backend) = MockConnector::new();
    connector.set_mode(mode);

    let camera = SyntheticCamera::new(64, 48, ImageEncoding::Jpeg);
    let (pipeline, live) = live_pipeline(
        &config,
        camera,
        Arc::clone(&service),
        Arc::new(connector.clone()),
    );
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(shutdown_rx));

    Harness {
        service,
        history,
        connector,
        backend,
        live,
        shutdown,
        task,
    }
}

/// Next submitted frame id, skipping pings
async fn next_frame(link: &mut MockLink) -> u64 {
    loop {
        let text = link.next_outbound().await.expect("session dropped the link");
        let message: Value = serde_json::from_str(&text).unwrap();
        if let Some(id) = message["frameId"].as_u64() {
            assert!(message["frame"].as_str().map_or(false, |f| !f.is_empty()));
            assert!(message["timestamp"].is_string());
            return id;
        }
        assert_eq!(message["type"], "ping");
    }
}

fn accident(frame_id: u64) -> String {
    json!({
        "accidentDetected": true,
        "confidence": 0.91,
        "frameId": frame_id,
        "predictedClass": "accident",
        "processingTimeSeconds": 0.25
    })
    .to_string()
}

async fn stop(harness: Harness) {
    harness.shutdown.send(true).unwrap();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn accident_result_becomes_alert() {
    let mut h = start(config(), MockMode::Accept);
    let mut changes = h.history.subscribe();

    let mut link = h.backend.accept().await.unwrap();
    assert_eq!(link.url, "ws://127.0.0.1:8000/live/stream");
    assert!(link.reply(r#"{"type":"connection_established"}"#).await);

    let frame_id = next_frame(&mut link).await;
    assert!(link.reply(accident(frame_id)).await);

    let change = changes.recv().await.unwrap();
    let ChangeKind::Appended(id) = change.kind else {
        panic!("unexpected change {:?}", change.kind);
    };
    let alert = h.service.get(&id).unwrap();
    assert_eq!(alert.detection.frame_id(), frame_id);
    assert_eq!(alert.metadata.location.as_deref(), Some("Bay 2"));
    assert_eq!(h.service.in_app().current().map(|a| a.id), Some(id));

    let _ = h
        .live
        .status
        .wait_for(|s| s.router.results == 1 && s.results.accidents == 1)
        .await
        .unwrap();

    // The slot is free again, so the next tick submits a new frame
    let next = next_frame(&mut link).await;
    assert!(next > frame_id);

    stop(h).await;
}

#[tokio::test(start_paused = true)]
async fn stale_frame_never_reaches_deduplicator() {
    let mut h = start(config(), MockMode::Accept);
    let mut link = h.backend.accept().await.unwrap();
    let frame_id = next_frame(&mut link).await;

    assert!(link.reply(accident(frame_id + 1000)).await);
    assert!(link.reply(r#"{"not": "a result"}"#).await);
    let _ = h
        .live
        .status
        .wait_for(|s| s.router.stale == 1 && s.router.rejected == 1)
        .await
        .unwrap();

    assert!(h.history.is_empty());
    let stats = h.service.stats();
    assert_eq!((stats.admitted, stats.suppressed), (0, 0));

    stop(h).await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_supersedes_outstanding_frame() {
    let mut h = start(config(), MockMode::Accept);
    let mut first = h.backend.accept().await.unwrap();
    let old_frame = next_frame(&mut first).await;

    first.close().await;
    let mut second = h.backend.accept().await.unwrap();
    assert_eq!(h.connector.attempts(), 2);

    let new_frame = next_frame(&mut second).await;
    assert!(new_frame > old_frame);

    // A late reply for the superseded frame is stale on the new session
    assert!(second.reply(accident(old_frame)).await);
    let _ = h.live.status.wait_for(|s| s.router.stale == 1).await.unwrap();
    assert!(h.history.is_empty());

    assert!(second.reply(accident(new_frame)).await);
    let _ = h.live.status.wait_for(|s| s.router.accidents == 1).await.unwrap();

    stop(h).await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_backoff_then_reopens_on_request() {
    let mut config = config();
    config.live.backoff.max_attempts = 2;
    let mut h = start(config, MockMode::Refuse("backend down".to_string()));

    let _ = h
        .live
        .status
        .wait_for(|s| s.state == SessionState::Closed && !s.sampling)
        .await
        .unwrap();
    assert_eq!(h.connector.attempts(), 3);

    h.connector.set_mode(MockMode::Accept);
    h.live.commands.send(LiveCommand::Reconnect).await.unwrap();
    let mut link = h.backend.accept().await.unwrap();
    let _ = h
        .live
        .status
        .wait_for(|s| s.state == SessionState::Open && s.sampling && s.reconnect_attempts == 0)
        .await
        .unwrap();
    next_frame(&mut link).await;

    stop(h).await;
}
