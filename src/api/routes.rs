//! API route handlers.
//!
//! All endpoints return JSON except `/api/events` (SSE). State is shared
//! via `Arc<ApiState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::engine::{BotRegistry, BotSummary};
use crate::types::{
    decode_currency, ControlResponse, MirrorError, StartRequest, TradeLogRecord, TrustLine,
};

const DEFAULT_TRADES_LIMIT: u32 = 50;
const MAX_TRADES_LIMIT: u32 = 500;

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub registry: Arc<BotRegistry>,
}

pub type AppState = Arc<ApiState>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesQuery {
    pub user_id: Option<String>,
    pub limit: Option<u32>,
}

/// POST /api/copytrading/start
pub async fn start_copy_trading(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<ControlResponse>, MirrorError> {
    state.registry.start(request).await.map(Json)
}

/// POST /api/copytrading/stop
pub async fn stop_copy_trading(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> Json<ControlResponse> {
    Json(state.registry.stop(request.user_id.trim()).await)
}

/// GET /api/copytrading/bots
pub async fn list_bots(State(state): State<AppState>) -> Json<Vec<BotSummary>> {
    Json(state.registry.list().await)
}

/// GET /api/trades
pub async fn get_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeLogRecord>>, (StatusCode, Json<serde_json::Value>)> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRADES_LIMIT)
        .clamp(1, MAX_TRADES_LIMIT);

    state
        .registry
        .context()
        .audit
        .recent_trades(query.user_id, limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "Trade log query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to read trade logs" })),
            )
        })
}

/// GET /api/trustlines/:address
///
/// One-off lookup on a fresh session against the default endpoints.
pub async fn get_trust_lines(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<TrustLine>>, (StatusCode, Json<serde_json::Value>)> {
    let ctx = state.registry.context();
    let bad_gateway = |e: crate::ledger::LedgerError| {
        warn!(address = %address, error = %e, "Trust line lookup failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": format!("Trust line lookup failed: {e}") })),
        )
    };

    let session = ctx
        .connection_manager()
        .connect(&ctx.default_endpoints)
        .await
        .map_err(bad_gateway)?;
    let lines = session.account_lines(&address).await;
    session.disconnect().await;

    let lines = lines
        .map_err(bad_gateway)?
        .into_iter()
        .map(|line| TrustLine {
            currency: decode_currency(&line.currency),
            ..line
        })
        .collect();
    Ok(Json(lines))
}

/// GET /api/events
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.context().notifier.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(notification) => match Event::default().json_data(&notification) {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(e) => warn!(error = %e, "Unserializable notification skipped"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream observer lagging, notifications dropped")
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
