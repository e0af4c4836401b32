//! The downstream multiplexer: one MCP server surface over the fleet,
//! offered on stdio, streamable HTTP, or legacy SSE.

mod auth;
mod http;
mod sse;
mod stdio;

pub use auth::constant_time_eq;
pub use http::{serve_http, serve_http_on};
pub use sse::{serve_sse, serve_sse_on};
pub use stdio::serve_stdio;

use std::sync::Arc;

use serde_json::Value;

use crate::fleet::Fleet;
use crate::mcp::{CallToolResult, MCP_PROTOCOL_VERSION};

/// Fleet shared across session transports. Mutation of the upstream map is
/// serialized behind this lock.
pub type SharedFleet = Arc<tokio::sync::Mutex<Fleet>>;

pub fn shared(fleet: Fleet) -> SharedFleet {
    Arc::new(tokio::sync::Mutex::new(fleet))
}

/// Handles one MCP JSON-RPC message. Returns `None` for notifications.
pub async fn handle_message(fleet: &SharedFleet, message: &Value) -> Option<Value> {
    let method = message.get("method").and_then(|v| v.as_str())?;
    let id = message.get("id").cloned();

    // Notifications carry no id and get no response.
    let id = match id {
        Some(id) => id,
        None => return None,
    };

    let result = match method {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "serverInfo": {
                "name": "spike",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "tools": {} },
        })),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(list_tools(fleet).await),
        "tools/call" => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            Ok(call_tool(fleet, &params).await)
        }
        other => Err((-32601i64, format!("method not found: {other}"))),
    };

    Some(match result {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }),
        Err((code, message)) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }),
    })
}

async fn list_tools(fleet: &SharedFleet) -> Value {
    let fleet = fleet.lock().await;
    let tools: Vec<Value> = fleet
        .all_tools()
        .into_iter()
        .map(|entry| {
            // Prefix descriptions with the owning server for traceability;
            // fall back to the original name when the upstream gave none.
            let body = entry
                .tool
                .description
                .clone()
                .unwrap_or_else(|| entry.tool.name.clone());
            serde_json::json!({
                "name": entry.namespaced_name,
                "description": format!("[{}] {}", entry.server_name, body),
                "inputSchema": entry.tool.input_schema,
            })
        })
        .collect();
    serde_json::json!({ "tools": tools })
}

/// Every failure crossing this boundary becomes a well-formed tool result
/// with `isError`, never a transport-level fault: the LLM on the other side
/// must always receive something it can reason about.
async fn call_tool(fleet: &SharedFleet, params: &Value) -> Value {
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    let result = {
        let mut fleet = fleet.lock().await;
        fleet.call_tool(name, arguments).await
    };

    let result = match result {
        Ok(result) => result,
        Err(err) => CallToolResult::error(format!("Error: {err}")),
    };
    serde_json::to_value(&result)
        .unwrap_or_else(|err| serde_json::json!({
            "content": [{ "type": "text", "text": format!("Error: {err}") }],
            "isError": true,
        }))
}

/// Count used by the health endpoints.
pub(crate) async fn tool_count(fleet: &SharedFleet) -> usize {
    fleet.lock().await.all_tools().len()
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
