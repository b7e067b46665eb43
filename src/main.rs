// Interactive mode: upload page and removal API over HTTP

use cutout_server::{
    api::{self, AppState},
    core::Config,
    BackgroundRemover, Metrics, SegmentationService,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(cutout_server::log_filter(config.log_level()))
        .init();

    info!("=== IMAGE BACKGROUND REMOVAL ===");
    info!(
        "Config: model={} input={} pool={} alpha_threshold={}",
        config.model_path(),
        config.model_input_size(),
        config.onnx_pool_size(),
        config.alpha_threshold()
    );

    let metrics = Metrics::new();

    // Session creation and warmup are CPU-bound
    info!("Initializing segmentation service...");
    let segmentation = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || SegmentationService::new(&config))
            .await
            .context("Segmentation start-up task panicked")??
    };
    let segmentation = Arc::new(segmentation);

    let remover = BackgroundRemover::new(segmentation.clone())
        .with_alpha_threshold(config.alpha_threshold())
        .with_metrics(metrics.clone());

    let app = api::router(AppState { remover, metrics }, config.max_upload_bytes());

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /            - Upload page");
    info!("  GET  /health      - Health check");
    info!("  GET  /metrics     - Prometheus metrics");
    info!("  GET  /stats       - Detailed statistics");
    info!("  POST /remove      - Remove background, JSON with data URI (multipart/form-data)");
    info!("  POST /remove/png  - Remove background, PNG download (multipart/form-data)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    segmentation.cleanup_sessions();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
