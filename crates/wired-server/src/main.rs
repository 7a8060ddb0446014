mod bridge;
mod config;
mod state;
mod upload;
mod ws;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use config::{Cli, ServerConfig};
use state::{AppState, SharedState};

fn init_tracing() {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter_layer)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::try_from(Cli::parse())?;
    log::info!(
        "starting wired-term on {} (shell {}, workdir {}, storage {}, upload limit {} bytes)",
        config.listen_addr,
        config.shell,
        config.workdir.display(),
        config.storage_dir.display(),
        config.max_upload_bytes
    );

    run(config).await
}

async fn run(config: ServerConfig) -> Result<()> {
    let listen_addr = config.listen_addr;
    let state = Arc::new(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    log::info!("listening on {listen_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    log::info!("shutdown complete");
    Ok(())
}

pub(crate) fn router(state: SharedState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/upload", post(upload::upload_handler).layer(upload_limit))
        .with_state(state)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received");
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
