//! Liveness endpoint for container platforms that probe a port.

use anyhow::{Context, Result};
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

async fn ok() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], "OK")
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        "Not Found",
    )
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(ok))
        .route("/healthz", get(ok))
        .route("/readyz", get(ok))
        .fallback(not_found)
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{port}");
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))
}

/// Serve health checks until `cancel` fires.
pub async fn serve(listener: TcpListener, cancel: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Health server listening on {}", addr);
    }
    axum::serve(listener, router())
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Health server error")
}
