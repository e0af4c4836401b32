use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::{redact_reqwest_error, Client, ClientHandle, Error, Limits, ProtocolErrorKind};

const HTTP_TRANSPORT_ERROR: i64 = -32000;

#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Extra HTTP headers to include on all requests (e.g. `Authorization`).
    pub headers: HashMap<String, String>,
    /// Timeout applied while establishing HTTP connections.
    pub connect_timeout: Option<Duration>,
    /// Timeout applied to individual POST request/response bodies.
    ///
    /// Note: never applied to the long-lived SSE connection.
    pub request_timeout: Option<Duration>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            connect_timeout: Some(Duration::from_secs(10)),
            request_timeout: None,
        }
    }
}

pub(crate) type BridgeWriter = Arc<tokio::sync::Mutex<tokio::io::WriteHalf<tokio::io::DuplexStream>>>;

pub(crate) fn build_http_client(options: &HttpOptions) -> Result<reqwest::Client, Error> {
    let mut headers = reqwest::header::HeaderMap::new();
    for (key, value) in &options.headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            Error::protocol(
                ProtocolErrorKind::InvalidInput,
                format!("invalid http header name: {key}"),
            )
        })?;
        let value = reqwest::header::HeaderValue::from_str(value).map_err(|_| {
            Error::protocol(
                ProtocolErrorKind::InvalidInput,
                format!("invalid http header value: {key}"),
            )
        })?;
        headers.insert(name, value);
    }

    let mut builder = reqwest::Client::builder()
        // Avoid automatic proxy environment variable loading and redirects.
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .default_headers(headers);
    if let Some(timeout) = options.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder.build().map_err(|err| {
        Error::protocol(
            ProtocolErrorKind::InvalidInput,
            format!("build http client failed: {err}"),
        )
    })
}

impl Client {
    /// Connect to a "streamable http" MCP server.
    ///
    /// Outgoing messages become `POST <url>` requests; an optional long-lived
    /// `GET <url>` SSE stream carries server-initiated messages. Both are
    /// bridged onto the line-delimited JSON-RPC core through an in-process
    /// duplex pipe. The `mcp-session-id` response header is captured on first
    /// sight and replayed on every subsequent request.
    pub async fn connect_streamable_http(url: &str, options: HttpOptions) -> Result<Self, Error> {
        Self::connect_streamable_http_with_limits(url, options, Limits::default()).await
    }

    pub async fn connect_streamable_http_with_limits(
        url: &str,
        options: HttpOptions,
        limits: Limits,
    ) -> Result<Self, Error> {
        let http_client = build_http_client(&options)?;
        let max_message_bytes = limits.max_message_bytes;

        let (client_stream, bridge_stream) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_stream);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_stream);

        let mut client = Self::connect_io_with_limits(client_read, client_write, limits).await?;
        let handle = client.handle();

        let writer: BridgeWriter = Arc::new(tokio::sync::Mutex::new(bridge_write));
        let session_id: Arc<tokio::sync::Mutex<Option<String>>> =
            Arc::new(tokio::sync::Mutex::new(None));

        let post_task = tokio::spawn(
            PostBridge {
                bridge_read,
                writer: writer.clone(),
                handle: handle.clone(),
                http_client: http_client.clone(),
                post_url: url.to_string(),
                session_id: session_id.clone(),
                max_message_bytes,
                request_timeout: options.request_timeout,
            }
            .run(),
        );

        let sse_url = url.to_string();
        let connect_timeout = options.connect_timeout;
        let sse_task = tokio::spawn(async move {
            // The GET channel is optional: servers that only answer POSTs
            // reply 405 and we simply never deliver server-initiated messages.
            let mut req = http_client
                .get(&sse_url)
                .header(reqwest::header::ACCEPT, "text/event-stream");
            if let Some(session) = session_id.lock().await.clone() {
                req = req.header("mcp-session-id", session);
            }
            let send = req.send();
            let resp = match connect_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, send).await {
                    Ok(resp) => resp,
                    Err(_) => return,
                },
                None => send.await,
            };
            let Ok(resp) = resp else {
                return;
            };
            if !resp.status().is_success() {
                return;
            }

            if let Some(value) = resp.headers().get("mcp-session-id") {
                if let Ok(value) = value.to_str() {
                    *session_id.lock().await = Some(value.to_string());
                }
            }

            let stream = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other));
            let mut reader = tokio::io::BufReader::new(StreamReader::new(stream));
            let _ = pump_sse_data(&mut reader, &writer, max_message_bytes, |_| true).await;
        });

        client.transport_tasks.push(post_task);
        client.transport_tasks.push(sse_task);
        Ok(client)
    }
}

struct PostBridge {
    bridge_read: tokio::io::ReadHalf<tokio::io::DuplexStream>,
    writer: BridgeWriter,
    handle: ClientHandle,
    http_client: reqwest::Client,
    post_url: String,
    session_id: Arc<tokio::sync::Mutex<Option<String>>>,
    max_message_bytes: usize,
    request_timeout: Option<Duration>,
}

impl PostBridge {
    async fn run(self) {
        let Self {
            bridge_read,
            writer,
            handle,
            http_client,
            post_url,
            session_id,
            max_message_bytes,
            request_timeout,
        } = self;

        let mut reader = tokio::io::BufReader::new(bridge_read);
        loop {
            let line = match crate::read_line_limited(&mut reader, max_message_bytes).await {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(err) => {
                    handle
                        .close_with_reason(format!("streamable http POST bridge failed: {err}"))
                        .await;
                    return;
                }
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let id = serde_json::from_slice::<Value>(&line)
                .ok()
                .and_then(|v| v.get("id").cloned());

            let mut req = http_client
                .post(&post_url)
                .header(
                    reqwest::header::ACCEPT,
                    "application/json, text/event-stream",
                )
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(line);
            if let Some(session) = session_id.lock().await.clone() {
                req = req.header("mcp-session-id", session);
            }

            let send = req.send();
            let resp = match request_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, send).await {
                    Ok(resp) => resp,
                    Err(_) => {
                        write_transport_error(&writer, id, "http request timed out".to_string())
                            .await;
                        continue;
                    }
                },
                None => send.await,
            };
            let resp = match resp {
                Ok(resp) => resp,
                Err(err) => {
                    write_transport_error(
                        &writer,
                        id,
                        format!("http request failed: {}", redact_reqwest_error(&err)),
                    )
                    .await;
                    continue;
                }
            };

            if let Some(value) = resp.headers().get("mcp-session-id") {
                if let Ok(value) = value.to_str() {
                    *session_id.lock().await = Some(value.to_string());
                }
            }

            let status = resp.status();
            if !status.is_success() {
                write_transport_error(&writer, id, format!("http error: {status}")).await;
                continue;
            }

            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_ascii_lowercase();

            if content_type.starts_with("text/event-stream") {
                // Response delivered as a short SSE stream: forward every data
                // event as its own JSON line.
                let stream = resp
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(io::Error::other));
                let mut sse_reader = tokio::io::BufReader::new(StreamReader::new(stream));
                let pump = pump_sse_data(&mut sse_reader, &writer, max_message_bytes, |_| true);
                let result = match request_timeout {
                    Some(timeout) => match tokio::time::timeout(timeout, pump).await {
                        Ok(result) => result,
                        Err(_) => Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "http response stream timed out",
                        )),
                    },
                    None => pump.await,
                };
                if result.is_err() {
                    write_transport_error(&writer, id, "http response stream failed".to_string())
                        .await;
                }
                continue;
            }

            let body = match request_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, resp.bytes()).await {
                    Ok(body) => body,
                    Err(_) => {
                        write_transport_error(&writer, id, "http response timed out".to_string())
                            .await;
                        continue;
                    }
                },
                None => resp.bytes().await,
            };
            match body {
                Ok(body) if body.is_empty() => {
                    // 202 Accepted for notifications carries no body.
                    if status != reqwest::StatusCode::ACCEPTED {
                        write_transport_error(&writer, id, "http response is empty".to_string())
                            .await;
                    }
                }
                Ok(body) => {
                    if body.len() > max_message_bytes {
                        write_transport_error(&writer, id, "http response too large".to_string())
                            .await;
                        continue;
                    }
                    if serde_json::from_slice::<Value>(&body).is_err() {
                        write_transport_error(
                            &writer,
                            id,
                            "http response is not valid json".to_string(),
                        )
                        .await;
                        continue;
                    }
                    let _ = write_json_line(&writer, &body).await;
                }
                Err(err) => {
                    write_transport_error(
                        &writer,
                        id,
                        format!("http response read failed: {}", redact_reqwest_error(&err)),
                    )
                    .await;
                }
            }
        }
    }
}

/// Reads an SSE byte stream and forwards every completed `data:` payload as a
/// JSON line. `on_event` receives the event name (empty when absent) and can
/// veto forwarding of that event's data.
pub(crate) async fn pump_sse_data<R, F>(
    reader: &mut R,
    writer: &BridgeWriter,
    max_message_bytes: usize,
    mut on_event: F,
) -> Result<(), io::Error>
where
    R: tokio::io::AsyncBufRead + Unpin,
    F: FnMut(&str) -> bool,
{
    let mut data = Vec::new();
    let mut event_name = String::new();

    loop {
        let line = crate::read_line_limited(reader, max_message_bytes).await?;
        let Some(line) = line else {
            return Ok(());
        };

        if line.is_empty() {
            if !data.is_empty() {
                if on_event(&event_name) {
                    write_json_line(writer, &data).await?;
                }
                data.clear();
            }
            event_name.clear();
            continue;
        }

        if let Some(rest) = line.strip_prefix(b"event:") {
            event_name = String::from_utf8_lossy(rest).trim().to_string();
            continue;
        }

        if let Some(rest) = line.strip_prefix(b"data:") {
            let mut rest = rest;
            while rest.first().is_some_and(|b| b.is_ascii_whitespace()) {
                rest = &rest[1..];
            }
            if !data.is_empty() {
                data.push(b'\n');
            }
            if data.len().saturating_add(rest.len()) > max_message_bytes {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "sse event too large",
                ));
            }
            data.extend_from_slice(rest);
        }
        // Comment lines and unknown fields are ignored.
    }
}

pub(crate) async fn write_json_line(writer: &BridgeWriter, line: &[u8]) -> Result<(), io::Error> {
    let mut writer = writer.lock().await;
    writer.write_all(line).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Bridges a transport failure back to the in-flight request as a JSON-RPC
/// error response, so the caller's pending future resolves.
pub(crate) async fn write_transport_error(writer: &BridgeWriter, id: Option<Value>, message: String) {
    let Some(id) = id else {
        return;
    };
    let response = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": HTTP_TRANSPORT_ERROR, "message": message },
    });
    if let Ok(out) = serde_json::to_vec(&response) {
        let _ = write_json_line(writer, &out).await;
    }
}
