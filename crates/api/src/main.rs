//! Accident Alert Service - Main Entry Point

use anyhow::Context;
use api::{
    build_history, build_service, create_router, init_logging, spawn_live, AppConfig, AppState,
    BatchClient,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use stream_session::WebSocketConnector;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_logging(&config.logging).context("installing tracing subscriber")?;

    info!("=== Accident Alert Service v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let history = build_history(&config.history).context("opening alert history")?;
    let service = build_service(&config, history).context("building alert service")?;
    let permission = service.request_desktop_permission().await;
    info!("Desktop notifications: {:?}", permission);

    let batch = BatchClient::new(&config.backend).context("building batch client")?;
    let mut state = AppState::new(Arc::clone(&service))
        .with_batch(batch)
        .with_metrics(metrics);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut live_task = None;
    if config.live.enabled {
        let (handle, task) = spawn_live(
            &config,
            Arc::clone(&service),
            Arc::new(WebSocketConnector::default()),
            shutdown_rx,
        )
        .context("starting live pipeline")?;
        state = state.with_live(handle);
        live_task = Some(task);
    } else {
        info!("Live monitoring disabled");
    }

    let app = create_router(Arc::new(state), &config.rate_limit, &config.upload);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("Starting API server on {}", config.server.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = live_task {
        task.await?.context("live pipeline")?;
    }
    Ok(())
}
