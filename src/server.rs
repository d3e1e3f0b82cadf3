//! HTTP transport
//!
//! - `POST /mcp`: one JSON-RPC request per body
//! - `GET /mcp`: server-sent event stream carrying only keep-alive comments
//! - `GET /healthz`: static liveness probe

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::registry::ToolRegistry;
use crate::rpc;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub keepalive_interval: Duration,
    /// Cancelled on server shutdown; ends open event streams
    pub shutdown: CancellationToken,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", get(event_stream).post(rpc_endpoint))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
///
/// # Errors
///
/// - `Internal` if the listener fails while serving
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> AppResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http server listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Internal(format!("http server failed: {e}")))
}

async fn rpc_endpoint(State(state): State<AppState>, body: Bytes) -> Response {
    match rpc::handle_body(&state.registry, &body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("event stream opened");
    Sse::new(keepalive_frames(state.keepalive_interval, state.shutdown.clone()))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Comment frames at a fixed interval, the first one immediately
///
/// The stream ends when `shutdown` is cancelled; a client disconnect drops it.
fn keepalive_frames(
    interval: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let ticker = tokio::time::interval(interval);
    futures::stream::unfold((ticker, shutdown), |(mut ticker, shutdown)| async move {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            _ = ticker.tick() => Some((Ok(Event::default().comment("keepalive")), (ticker, shutdown))),
        }
    })
}
