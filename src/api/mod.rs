//! HTTP control surface: Axum server for starting, stopping and
//! observing follower bots.
//!
//! Thin glue over `BotRegistry`: JSON in, JSON out, plus an SSE stream
//! of trade notifications. CORS is open for local front-ends.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::types::MirrorError;
use routes::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/copytrading/start", post(routes::start_copy_trading))
        .route("/api/copytrading/stop", post(routes::stop_copy_trading))
        .route("/api/copytrading/bots", get(routes::list_bots))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/trustlines/:address", get(routes::get_trust_lines))
        .route("/api/events", get(routes::events))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` resolves.
pub async fn serve(
    app: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MirrorError::AlreadyRunning(_) => StatusCode::CONFLICT,
            MirrorError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            MirrorError::Connection(_) => StatusCode::BAD_GATEWAY,
            MirrorError::Startup { .. } | MirrorError::Cancelled(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
