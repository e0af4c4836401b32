//! Argument assembly for direct tool invocations, and the bookkeeping that
//! runs after a successful call.

use serde_json::{Map, Value};

use crate::mcp::{CallToolResult, NamespacedTool};

use super::state::SessionState;
use super::visibility::{is_config_prerequisite, stripped_name, tool_prefix};

/// Identifier keys harvested from create-style results, in harvest order.
const CREATED_ID_KEYS: [&str; 5] = ["id", "game_id", "player_id", "app_id", "session_id"];

/// Placeholder recorded when a create succeeded without any recognisable id.
const CREATED_SENTINEL: &str = "_created";

#[derive(Debug, thiserror::Error)]
#[error("invalid JSON arguments: {0}")]
pub struct InvalidJsonArgs(pub String);

fn is_id_param(name: &str) -> bool {
    name == "id" || name.ends_with("_id")
}

/// Builds the argument object for a call: schema defaults, then user-supplied
/// values, then auto-filled identifiers. Returns the assembled map and the
/// required parameters still missing (to be prompted for, in order).
pub fn assemble_arguments(
    tool: &NamespacedTool,
    user_raw: &str,
    state: &SessionState,
) -> Result<(Map<String, Value>, Vec<String>), InvalidJsonArgs> {
    let user: Map<String, Value> = if user_raw.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(user_raw.trim()) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(InvalidJsonArgs(format!(
                    "expected a JSON object, got: {other}"
                )))
            }
            Err(err) => return Err(InvalidJsonArgs(err.to_string())),
        }
    };

    let schema = &tool.tool.input_schema;
    let mut args = Map::new();

    // Schema defaults first, so user values win on overlay.
    if let Some(Value::Object(properties)) = schema.properties.as_ref() {
        for (name, node) in properties {
            if let Some(default) = node.get("default") {
                args.insert(name.clone(), default.clone());
            }
        }
    }

    for (key, value) in user {
        args.insert(key, value);
    }

    let mut missing = Vec::new();
    for required in schema.required_params() {
        if args.contains_key(required) {
            continue;
        }
        if is_id_param(required) {
            if let Some(value) = lookup_identifier(state, required) {
                args.insert(required.clone(), Value::String(value));
                continue;
            }
        }
        missing.push(required.clone());
    }

    Ok((args, missing))
}

/// Most recent identifier for a required parameter: the exact key first,
/// then the bare `id` stream as a stand-in for any `*_id`.
fn lookup_identifier(state: &SessionState, param: &str) -> Option<String> {
    if let Some(value) = state.latest_id(param) {
        return Some(value.to_string());
    }
    if param.ends_with("_id") {
        if let Some(value) = state.latest_id("id") {
            return Some(value.to_string());
        }
    }
    None
}

/// Coerces an interactive answer into the parameter's declared type.
pub fn coerce_answer(answer: &str, tool: &NamespacedTool, param: &str) -> Value {
    let declared = tool
        .tool
        .input_schema
        .property(param)
        .and_then(|node| node.get("type"))
        .and_then(|v| v.as_str());

    match declared {
        Some("number") | Some("integer") => answer
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
            .unwrap_or_else(|| Value::String(answer.to_string())),
        Some("boolean") => {
            let truthy = matches!(answer.trim(), "true" | "1");
            Value::Bool(truthy)
        }
        Some("array") | Some("object") => serde_json::from_str(answer)
            .unwrap_or_else(|_| Value::String(answer.to_string())),
        _ => Value::String(answer.to_string()),
    }
}

/// Records what a successful result teaches the session. Error results are
/// never recorded.
pub fn record_call_result(
    state: &mut SessionState,
    tool: &NamespacedTool,
    sep: &str,
    result: &CallToolResult,
) {
    if result.is_error() {
        return;
    }

    let parsed: Option<Value> = serde_json::from_str(&result.text_content()).ok();

    if let Some(Value::Object(map)) = &parsed {
        for (key, value) in map {
            if is_id_param(key) {
                if let Value::String(value) = value {
                    state.record_id(key.clone(), value.clone());
                }
            }
        }
    }

    if is_config_prerequisite(stripped_name(tool, sep)) {
        state.mark_config_tool_called(stripped_name(tool, sep));
    }

    let lowered = tool.namespaced_name.to_lowercase();
    if lowered.contains("create") || lowered.contains("bootstrap") {
        let mut ids = Vec::new();
        if let Some(Value::Object(map)) = &parsed {
            for key in CREATED_ID_KEYS {
                if let Some(Value::String(value)) = map.get(key) {
                    ids.push(value.clone());
                }
            }
        }
        if ids.is_empty() {
            ids.push(CREATED_SENTINEL.to_string());
        }
        state.record_created(tool_prefix(tool, sep), ids);
    }
}
