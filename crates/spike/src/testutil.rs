//! In-memory fake upstreams for tests: a task speaking line-delimited
//! JSON-RPC over a duplex pipe, answering initialize / tools/list /
//! tools/call.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::config::UpstreamConfig;
use crate::mcp::{CallToolResult, Tool, ToolInputSchema};
use crate::upstream::Upstream;

pub fn tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: ToolInputSchema::empty_object(),
    }
}

pub fn tool_with_schema(name: &str, schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: None,
        input_schema: serde_json::from_value(schema).unwrap(),
    }
}

/// Spawns a fake upstream server task and returns a connected `Upstream`.
/// `respond` maps `(tool_name, arguments)` to the call result.
pub async fn fake_upstream<F>(name: &str, tools: Vec<Tool>, respond: F) -> Upstream
where
    F: Fn(&str, &Value) -> CallToolResult + Send + 'static,
{
    fake_upstream_with_config(
        name,
        UpstreamConfig::stdio("fake", vec![]),
        tools,
        respond,
    )
    .await
}

pub async fn fake_upstream_with_config<F>(
    name: &str,
    config: UpstreamConfig,
    tools: Vec<Tool>,
    respond: F,
) -> Upstream
where
    F: Fn(&str, &Value) -> CallToolResult + Send + 'static,
{
    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_stream);
    let (server_read, mut server_write) = tokio::io::split(server_stream);

    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(server_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(request) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let Some(method) = request.get("method").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(id) = request.get("id") else {
                // Notification; nothing to answer.
                continue;
            };

            let result = match method {
                "initialize" => serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": { "name": "fake-upstream", "version": "0.0.0" },
                    "capabilities": { "tools": {} },
                }),
                "tools/list" => serde_json::json!({ "tools": tools }),
                "tools/call" => {
                    let params = request.get("params").cloned().unwrap_or(Value::Null);
                    let tool_name = params
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let arguments = params
                        .get("arguments")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default()));
                    serde_json::to_value(respond(&tool_name, &arguments)).unwrap()
                }
                _ => {
                    let response = serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32601, "message": format!("method not found: {method}") },
                    });
                    let mut out = serde_json::to_string(&response).unwrap();
                    out.push('\n');
                    if server_write.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            let response = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": result,
            });
            let mut out = serde_json::to_string(&response).unwrap();
            out.push('\n');
            if server_write.write_all(out.as_bytes()).await.is_err() {
                return;
            }
            let _ = server_write.flush().await;
        }
    });

    let client = spike_jsonrpc::Client::connect_io(client_read, client_write)
        .await
        .unwrap();
    let mut upstream = Upstream::new(name, config);
    upstream.attach_client(client).await.unwrap();
    upstream
}

/// Default call responder: echoes the tool name.
pub fn echo_responder(tool_name: &str, _arguments: &Value) -> CallToolResult {
    CallToolResult::text(format!("called {tool_name}"))
}
