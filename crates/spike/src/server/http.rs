//! Streamable HTTP transport: `POST /mcp` advances a session, `GET /mcp`
//! attaches the session's event stream, `DELETE /mcp` closes it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use super::auth::api_key_ok;
use super::SharedFleet;

pub const SESSION_HEADER: &str = "mcp-session-id";

const SESSION_EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub(crate) struct HttpState {
    fleet: SharedFleet,
    api_key: Arc<Option<String>>,
    sessions: Arc<tokio::sync::Mutex<HashMap<String, mpsc::Sender<Event>>>>,
}

impl HttpState {
    pub(crate) fn new(fleet: SharedFleet, api_key: Option<String>) -> Self {
        Self {
            fleet,
            api_key: Arc::new(api_key),
            sessions: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }
}

pub(crate) fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/mcp",
            get(mcp_get)
                .post(mcp_post)
                .delete(mcp_delete)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .with_state(state)
}

pub async fn serve_http(
    fleet: SharedFleet,
    port: u16,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    serve_http_on(fleet, listener, api_key).await
}

/// `serve_http` on an already-bound listener (useful for ephemeral ports).
pub async fn serve_http_on(
    fleet: SharedFleet,
    listener: tokio::net::TcpListener,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = HttpState::new(fleet.clone(), api_key);
    let sessions = state.sessions.clone();
    let app = build_router(state);

    info!("serving MCP over HTTP on port {}", listener.local_addr()?.port());
    axum::serve(listener, app)
        .with_graceful_shutdown(super::shutdown_signal())
        .await?;

    sessions.lock().await.clear();
    fleet.lock().await.close_all().await;
    info!("shut down");
    Ok(())
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    let tools = super::tool_count(&state.fleet).await;
    Json(serde_json::json!({ "status": "ok", "tools": tools }))
}

async fn mcp_post(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    if !api_key_ok(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }

    let Ok(message) = serde_json::from_slice::<Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid JSON" })),
        )
            .into_response();
    };

    // The first POST without a session id creates one; the id is echoed in
    // the response headers for the client to carry forward.
    let session_id = match header_session_id(&headers) {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            let (tx, _rx) = mpsc::channel(SESSION_EVENT_BUFFER);
            // The receiver is re-created when the client attaches via GET.
            state.sessions.lock().await.insert(id.clone(), tx);
            id
        }
    };

    let response = super::handle_message(&state.fleet, &message).await;
    let body = match response {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };

    with_session_header(body, &session_id)
}

async fn mcp_get(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if !api_key_ok(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }
    let Some(session_id) = header_session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Missing session" })),
        )
            .into_response();
    };

    let mut sessions = state.sessions.lock().await;
    if !sessions.contains_key(&session_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Unknown session" })),
        )
            .into_response();
    }

    let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
    sessions.insert(session_id.clone(), tx);
    drop(sessions);

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let sse = Sse::new(stream).keep_alive(KeepAlive::default());
    with_session_header(sse.into_response(), &session_id)
}

async fn mcp_delete(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if !api_key_ok(state.api_key.as_deref(), &headers) {
        return unauthorized();
    }
    if let Some(session_id) = header_session_id(&headers) {
        state.sessions.lock().await.remove(&session_id);
    }
    // Closing an unknown or absent session is tolerated.
    StatusCode::OK.into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "Method not allowed" })),
    )
        .into_response()
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

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::Fleet;
    use crate::server::shared;
    use crate::testutil::{echo_responder, fake_upstream, tool};

    async fn spawn_server(api_key: Option<String>) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let mut fleet = Fleet::new();
        fleet.attach_upstream(
            fake_upstream("vitest", vec![tool("run_tests")], echo_responder).await,
        );
        let state = HttpState::new(shared(fleet), api_key);
        let app = build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, task)
    }

    #[tokio::test]
    async fn health_is_open_and_counts_tools() {
        let (addr, task) = spawn_server(Some("secret-key".to_string())).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({ "status": "ok", "tools": 1 }));

        task.abort();
    }

    #[tokio::test]
    async fn api_key_matrix() {
        let (addr, task) = spawn_server(Some("secret-key".to_string())).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/mcp");
        let request = serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list",
        });

        let missing = client.post(&url).json(&request).send().await.unwrap();
        assert_eq!(missing.status(), 401);

        let wrong = client
            .post(&url)
            .header("x-api-key", "wrong")
            .json(&request)
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 401);

        let right = client
            .post(&url)
            .header("x-api-key", "secret-key")
            .json(&request)
            .send()
            .await
            .unwrap();
        assert_eq!(right.status(), 200);

        task.abort();
    }

    #[tokio::test]
    async fn post_creates_a_session_and_lists_tools() {
        let (addr, task) = spawn_server(None).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/mcp");

        let response = client
            .post(&url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/list",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(!session_id.is_empty());

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["result"]["tools"][0]["name"], "vitest__run_tests");

        // The session can be closed, twice, without error.
        for _ in 0..2 {
            let deleted = client
                .delete(&url)
                .header(SESSION_HEADER, &session_id)
                .send()
                .await
                .unwrap();
            assert_eq!(deleted.status(), 200);
        }

        task.abort();
    }

    #[tokio::test]
    async fn get_without_session_is_rejected() {
        let (addr, task) = spawn_server(None).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/mcp");

        let missing = client.get(&url).send().await.unwrap();
        assert_eq!(missing.status(), 400);

        let unknown = client
            .get(&url)
            .header(SESSION_HEADER, "nope")
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 400);

        task.abort();
    }

    #[tokio::test]
    async fn unknown_paths_and_methods() {
        let (addr, task) = spawn_server(None).await;
        let client = reqwest::Client::new();

        let missing = client
            .get(format!("http://{addr}/nope"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
        let body: Value = missing.json().await.unwrap();
        assert_eq!(body["error"], "Not found");

        let put = client
            .put(format!("http://{addr}/mcp"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(put.status(), 405);
        let body: Value = put.json().await.unwrap();
        assert_eq!(body["error"], "Method not allowed");

        task.abort();
    }
}
