//! Legacy SSE transport: `GET <url>` opens the event stream, the server's
//! first `endpoint` event names the POST target, and every outgoing message
//! becomes a `POST` to that target. Incoming `message` events carry JSON-RPC
//! payloads.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use crate::streamable_http::{
    build_http_client, write_json_line, write_transport_error, BridgeWriter, HttpOptions,
};
use crate::{redact_reqwest_error, Client, Error, Limits, ProtocolErrorKind};

const DEFAULT_ENDPOINT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct SseEvent {
    name: String,
    data: Vec<u8>,
}

/// Reads one complete SSE event (terminated by a blank line). Returns `None`
/// at end of stream. Comment lines and unknown fields are ignored.
async fn next_sse_event<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Option<SseEvent>, io::Error> {
    let mut name = String::new();
    let mut data = Vec::new();
    let mut saw_data = false;

    loop {
        let line = crate::read_line_limited(reader, max_bytes).await?;
        let Some(line) = line else {
            return Ok(None);
        };

        if line.is_empty() {
            if saw_data {
                return Ok(Some(SseEvent { name, data }));
            }
            name.clear();
            continue;
        }

        if let Some(rest) = line.strip_prefix(b"event:") {
            name = String::from_utf8_lossy(rest).trim().to_string();
            continue;
        }

        if let Some(rest) = line.strip_prefix(b"data:") {
            let mut rest = rest;
            while rest.first().is_some_and(|b| b.is_ascii_whitespace()) {
                rest = &rest[1..];
            }
            if saw_data {
                data.push(b'\n');
            }
            if data.len().saturating_add(rest.len()) > max_bytes {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "sse event too large",
                ));
            }
            data.extend_from_slice(rest);
            saw_data = true;
        }
    }
}

impl Client {
    pub async fn connect_sse(url: &str, options: HttpOptions) -> Result<Self, Error> {
        Self::connect_sse_with_limits(url, options, Limits::default()).await
    }

    pub async fn connect_sse_with_limits(
        url: &str,
        options: HttpOptions,
        limits: Limits,
    ) -> Result<Self, Error> {
        let http_client = build_http_client(&options)?;
        let max_message_bytes = limits.max_message_bytes;
        let connect_timeout = options.connect_timeout.unwrap_or(DEFAULT_ENDPOINT_WAIT);

        let base = reqwest::Url::parse(url).map_err(|err| {
            Error::protocol(
                ProtocolErrorKind::InvalidInput,
                format!("invalid sse url: {err}"),
            )
        })?;

        let send = http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send();
        let resp = tokio::time::timeout(connect_timeout, send)
            .await
            .map_err(|_| {
                Error::protocol(
                    ProtocolErrorKind::Transport,
                    "sse connect failed: request timed out",
                )
            })?
            .map_err(|err| {
                Error::protocol(
                    ProtocolErrorKind::Transport,
                    format!("sse connect failed: {}", redact_reqwest_error(&err)),
                )
            })?;

        if !resp.status().is_success() {
            return Err(Error::protocol(
                ProtocolErrorKind::Transport,
                format!("sse connect failed: status={}", resp.status()),
            ));
        }

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        let mut reader = tokio::io::BufReader::new(StreamReader::new(stream));

        // The stream prelude must carry the endpoint event before any
        // JSON-RPC traffic can flow.
        let endpoint = tokio::time::timeout(connect_timeout, async {
            loop {
                match next_sse_event(&mut reader, max_message_bytes).await {
                    Ok(Some(event)) if event.name == "endpoint" => {
                        return Ok(String::from_utf8_lossy(&event.data).trim().to_string());
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        return Err(Error::protocol(
                            ProtocolErrorKind::Transport,
                            "sse stream ended before endpoint event",
                        ));
                    }
                    Err(err) => return Err(Error::Io(err)),
                }
            }
        })
        .await
        .map_err(|_| {
            Error::protocol(
                ProtocolErrorKind::Transport,
                "sse connect failed: no endpoint event",
            )
        })??;

        let post_url = base.join(&endpoint).map_err(|err| {
            Error::protocol(
                ProtocolErrorKind::Transport,
                format!("invalid sse endpoint: {err}"),
            )
        })?;

        let (client_stream, bridge_stream) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_stream);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_stream);

        let mut client = Self::connect_io_with_limits(client_read, client_write, limits).await?;
        let handle = client.handle();
        let writer: BridgeWriter = Arc::new(tokio::sync::Mutex::new(bridge_write));

        let pump_writer = writer.clone();
        let pump_handle = handle.clone();
        let pump_task = tokio::spawn(async move {
            loop {
                match next_sse_event(&mut reader, max_message_bytes).await {
                    Ok(Some(event)) => {
                        if event.name.is_empty() || event.name == "message" {
                            if write_json_line(&pump_writer, &event.data).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        pump_handle.close_with_reason("sse connection closed").await;
                        return;
                    }
                    Err(err) => {
                        pump_handle
                            .close_with_reason(format!("sse connection failed: {err}"))
                            .await;
                        return;
                    }
                }
            }
        });

        let request_timeout = options.request_timeout;
        let post_task = tokio::spawn(async move {
            let mut reader = tokio::io::BufReader::new(bridge_read);
            loop {
                let line = match crate::read_line_limited(&mut reader, max_message_bytes).await {
                    Ok(Some(line)) => line,
                    Ok(None) => return,
                    Err(err) => {
                        handle
                            .close_with_reason(format!("sse POST bridge failed: {err}"))
                            .await;
                        return;
                    }
                };
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }

                let id = serde_json::from_slice::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").cloned());

                let send = http_client
                    .post(post_url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(line)
                    .send();
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
                match resp {
                    Ok(resp) if resp.status().is_success() => {
                        // Responses arrive over the event stream; POST bodies
                        // are acknowledgements only.
                    }
                    Ok(resp) => {
                        write_transport_error(&writer, id, format!("http error: {}", resp.status()))
                            .await;
                    }
                    Err(err) => {
                        write_transport_error(
                            &writer,
                            id,
                            format!("http request failed: {}", redact_reqwest_error(&err)),
                        )
                        .await;
                    }
                }
            }
        });

        client.transport_tasks.push(pump_task);
        client.transport_tasks.push(post_task);
        Ok(client)
    }
}
