//! Round-trips through the streamable HTTP transport against an in-process
//! axum server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

#[derive(Clone, Default)]
struct Recorded {
    session_headers: Arc<Mutex<Vec<Option<String>>>>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
}

async fn mcp_post(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    recorded.session_headers.lock().unwrap().push(
        headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    recorded.auth_headers.lock().unwrap().push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    let request: Value = serde_json::from_slice(&body).unwrap();
    if request.get("id").is_none() {
        // Notification.
        return (
            StatusCode::ACCEPTED,
            [("mcp-session-id", "sess-1")],
            Json(Value::Null),
        );
    }

    let response = serde_json::json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "result": { "echo": request["params"] },
    });
    (StatusCode::OK, [("mcp-session-id", "sess-1")], Json(response))
}

async fn spawn_server() -> (String, Recorded, tokio::task::JoinHandle<()>) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/mcp", post(mcp_post))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/mcp"), recorded, task)
}

#[tokio::test]
async fn request_response_round_trip() {
    let (url, _recorded, task) = spawn_server().await;

    let client =
        spike_jsonrpc::Client::connect_streamable_http(&url, spike_jsonrpc::HttpOptions::default())
            .await
            .unwrap();
    let result = client
        .request_with_timeout(
            "demo/echo",
            Some(serde_json::json!({ "x": 1 })),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!({ "echo": { "x": 1 } }));

    task.abort();
}

#[tokio::test]
async fn session_id_is_captured_and_replayed() {
    let (url, recorded, task) = spawn_server().await;

    let client =
        spike_jsonrpc::Client::connect_streamable_http(&url, spike_jsonrpc::HttpOptions::default())
            .await
            .unwrap();
    client
        .request_with_timeout("first", None, Duration::from_secs(5))
        .await
        .unwrap();
    client
        .request_with_timeout("second", None, Duration::from_secs(5))
        .await
        .unwrap();

    let sessions = recorded.session_headers.lock().unwrap().clone();
    // First POST has no session; every later one replays the server's id.
    assert_eq!(sessions.first().unwrap(), &None);
    assert_eq!(sessions.last().unwrap(), &Some("sess-1".to_string()));

    task.abort();
}

#[tokio::test]
async fn extra_headers_ride_on_every_request() {
    let (url, recorded, task) = spawn_server().await;

    let options = spike_jsonrpc::HttpOptions {
        headers: HashMap::from([(
            "Authorization".to_string(),
            "Bearer tok-123".to_string(),
        )]),
        ..Default::default()
    };
    let client = spike_jsonrpc::Client::connect_streamable_http(&url, options)
        .await
        .unwrap();
    client
        .request_with_timeout("demo/echo", None, Duration::from_secs(5))
        .await
        .unwrap();

    let auth = recorded.auth_headers.lock().unwrap().clone();
    assert!(auth
        .iter()
        .all(|h| h.as_deref() == Some("Bearer tok-123")));

    task.abort();
}

#[tokio::test]
async fn http_error_statuses_resolve_the_pending_request() {
    let app = Router::new().route(
        "/mcp",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = spike_jsonrpc::Client::connect_streamable_http(
        &format!("http://{addr}/mcp"),
        spike_jsonrpc::HttpOptions::default(),
    )
    .await
    .unwrap();
    let err = client
        .request_with_timeout("demo/fail", None, Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        spike_jsonrpc::Error::Rpc { message, .. } => {
            assert!(message.contains("http error"), "message={message}");
        }
        other => panic!("expected bridged rpc error, got {other:?}"),
    }

    task.abort();
}
