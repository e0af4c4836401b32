//! Legacy SSE transport: `GET /sse` opens the event stream (prelude names
//! the message endpoint), `POST /messages?sessionId=<id>` delivers client
//! messages, responses flow back over the stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use super::auth::api_key_ok;
use super::SharedFleet;

const SESSION_EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub(crate) struct SseState {
    fleet: SharedFleet,
    api_key: Arc<Option<String>>,
    sessions: Arc<tokio::sync::Mutex<HashMap<String, mpsc::Sender<Event>>>>,
}

impl SseState {
    pub(crate) fn new(fleet: SharedFleet, api_key: Option<String>) -> Self {
        Self {
            fleet,
            api_key: Arc::new(api_key),
            sessions: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }
}

pub(crate) fn build_router(state: SseState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sse", get(open_stream))
        .route("/messages", post(deliver_message))
        .fallback(not_found)
        .with_state(state)
}

pub async fn serve_sse(
    fleet: SharedFleet,
    port: u16,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    serve_sse_on(fleet, listener, api_key).await
}

/// `serve_sse` on an already-bound listener (useful for ephemeral ports).
pub async fn serve_sse_on(
    fleet: SharedFleet,
    listener: tokio::net::TcpListener,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = SseState::new(fleet.clone(), api_key);
    let sessions = state.sessions.clone();
    let app = build_router(state);

    info!("serving MCP over SSE on port {}", listener.local_addr()?.port());
    axum::serve(listener, app)
        .with_graceful_shutdown(super::shutdown_signal())
        .await?;

    sessions.lock().await.clear();
    fleet.lock().await.close_all().await;
    info!("shut down");
    Ok(())
}

async fn health(State(state): State<SseState>) -> Json<Value> {
    let tools = super::tool_count(&state.fleet).await;
    Json(serde_json::json!({ "status": "ok", "tools": tools }))
}

async fn open_stream(State(state): State<SseState>, headers: HeaderMap) -> Response {
    if !api_key_ok(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
    state
        .sessions
        .lock()
        .await
        .insert(session_id.clone(), tx);

    // Stream prelude: where to POST messages for this session.
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={session_id}"));
    let stream = tokio_stream::once(endpoint)
        .chain(ReceiverStream::new(rx))
        .map(Ok::<_, Infallible>);

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn deliver_message(
    State(state): State<SseState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !api_key_ok(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    let Some(session_id) = query.get("sessionId") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Missing sessionId" })),
        )
            .into_response();
    };
    let Some(tx) = state.sessions.lock().await.get(session_id).cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Unknown session" })),
        )
            .into_response();
    };

    let Ok(message) = serde_json::from_slice::<Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid JSON" })),
        )
            .into_response();
    };

    if let Some(response) = super::handle_message(&state.fleet, &message).await {
        if let Ok(data) = serde_json::to_string(&response) {
            let _ = tx.send(Event::default().event("message").data(data)).await;
        }
    }

    StatusCode::ACCEPTED.into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
        .into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Unauthorized" })),
    )
        .into_response()
}
