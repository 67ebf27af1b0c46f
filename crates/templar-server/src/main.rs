//! Templar Server - Main entry point

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use templar_common::logging::{init_logging, LogConfig};
use templar_engine::{ModelPipeline, PipelineConfig};
use templar_server::{api, config::ServerConfig, AppState};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("templar-server");
    init_logging(&log_config)?;

    info!("Starting Templar Server");

    let server_config = ServerConfig::load()?;
    let pipeline_config = PipelineConfig::load()?;
    info!(
        host = %server_config.host,
        port = server_config.port,
        model_dir = %pipeline_config.model_dir.display(),
        "configuration loaded"
    );

    let pipeline = Arc::new(ModelPipeline::from_config(&pipeline_config)?);
    let state = AppState::new(pipeline);

    let app = api::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(server_config.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give running jobs a moment to reach a packaging boundary
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
