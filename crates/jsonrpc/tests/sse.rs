//! Round-trips through the legacy SSE transport against an in-process axum
//! server: GET stream with an endpoint prelude, POST per message, responses
//! delivered over the stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

#[derive(Clone)]
struct Sessions {
    channels: Arc<tokio::sync::Mutex<HashMap<String, mpsc::Sender<Event>>>>,
}

async fn open_stream(State(sessions): State<Sessions>) -> impl IntoResponse {
    let session_id = "sse-sess-1".to_string();
    let (tx, rx) = mpsc::channel(16);
    sessions
        .channels
        .lock()
        .await
        .insert(session_id.clone(), tx);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={session_id}"));
    let stream = tokio_stream::once(endpoint)
        .chain(ReceiverStream::new(rx))
        .map(Ok::<_, Infallible>);
    Sse::new(stream)
}

async fn deliver(
    State(sessions): State<Sessions>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    let session_id = query.get("sessionId").cloned().unwrap_or_default();
    let Some(tx) = sessions.channels.lock().await.get(&session_id).cloned() else {
        return StatusCode::NOT_FOUND;
    };

    let request: Value = serde_json::from_slice(&body).unwrap();
    if let Some(id) = request.get("id") {
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "echo": request["params"] },
        });
        let _ = tx
            .send(
                Event::default()
                    .event("message")
                    .data(serde_json::to_string(&response).unwrap()),
            )
            .await;
    }
    StatusCode::ACCEPTED
}

async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
    let sessions = Sessions {
        channels: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
    };
    let app = Router::new()
        .route("/sse", get(open_stream))
        .route("/messages", post(deliver))
        .with_state(sessions);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/sse"), task)
}

#[tokio::test]
async fn request_response_round_trip_over_the_stream() {
    let (url, task) = spawn_server().await;

    let client = spike_jsonrpc::Client::connect_sse(&url, spike_jsonrpc::HttpOptions::default())
        .await
        .unwrap();
    let result = client
        .request_with_timeout(
            "demo/echo",
            Some(serde_json::json!({ "ok": true })),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!({ "echo": { "ok": true } }));

    task.abort();
}

#[tokio::test]
async fn connect_fails_without_an_endpoint_event() {
    // A stream that never sends the endpoint prelude.
    let app = Router::new().route(
        "/sse",
        get(|| async {
            let stream =
                tokio_stream::once(Ok::<_, Infallible>(Event::default().comment("quiet")));
            Sse::new(stream)
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let options = spike_jsonrpc::HttpOptions {
        connect_timeout: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    let err = spike_jsonrpc::Client::connect_sse(&format!("http://{addr}/sse"), options)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("endpoint"), "err={err}");

    task.abort();
}
