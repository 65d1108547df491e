//! HTTP API and static frontend

pub mod error;
pub mod extract;
pub mod routes;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::{ServeDir, ServeFile};

use crate::studio::Studio;
use error::ApiError;

pub use error::{ApiErrorResponse, ApiResult};

pub fn router(studio: Arc<Studio>) -> Router {
    let static_dir = studio.config().static_dir.clone();
    let guest_page = studio.config().guest_page.clone();

    let api = Router::new()
        .route("/deps", get(routes::deps))
        .route("/tunnel", post(routes::tunnel))
        .route("/local-ip", get(routes::local_ip))
        .route("/status", get(routes::status))
        .route("/stream/offer", post(routes::offer))
        .route("/stream/start", post(routes::start_stream))
        .route("/stream/stop", post(routes::stop_stream))
        .route("/stream/record/start", post(routes::start_recording))
        .route("/stream/record/stop", post(routes::stop_recording))
        .fallback(|| async { ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "no such endpoint") });

    Router::new()
        .nest("/api", api)
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route_service("/guest", ServeFile::new(guest_page))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(studio)
}

/// Serve the API until `cancel` fires.
pub async fn serve(
    studio: Arc<Studio>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP listening on http://{}", addr);
    }

    axum::serve(listener, router(studio))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
