//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hclip_api::{create_router, metrics, ApiConfig, AppState, ModelInfo};
use hclip_ml_client::{AnalysisClient, TranscriptionClient};
use hclip_worker::{JobService, Stages, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting hclip-api");

    for check in [
        hclip_media::check_ffmpeg(),
        hclip_media::check_ffprobe(),
        hclip_media::check_ytdlp(),
    ] {
        if let Err(e) = check {
            warn!("{}, jobs will fail until it is installed", e);
        }
    }

    let worker_config = WorkerConfig::from_env();
    let config = ApiConfig::from_env().with_upload_limit(worker_config.max_upload_bytes);
    info!("API config: host={}, port={}", config.host, config.port);

    let transcription = TranscriptionClient::from_env().context("transcription client")?;
    let analysis = AnalysisClient::from_env().context("analysis client")?;
    let models = ModelInfo {
        transcription: transcription.model().to_string(),
        analysis: analysis.model().to_string(),
    };

    let stages = Stages::production(transcription, analysis).context("pipeline stages")?;
    let service = JobService::start(worker_config, stages)
        .await
        .context("failed to start job service")?;
    let service = Arc::new(service);

    let state = AppState::new(config.clone(), Arc::clone(&service), models)
        .await
        .context("failed to create application state")?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining jobs");
    if !service.shutdown().await {
        warn!("Some jobs were still running at shutdown");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("hclip=info,tower_http=info"))?;

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true).with_thread_ids(false))
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
