//! Typed wrappers for the slice of the MCP schema this crate speaks.
//!
//! These types are intentionally a *subset* of the full MCP schema. Tool input
//! schemas stay `serde_json::Value` so upstream schemas are forwarded
//! byte-exact; only the envelope is typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolInputSchema,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolInputSchema {
    #[serde(default = "json_schema_object_type_default")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

fn json_schema_object_type_default() -> String {
    "object".to_string()
}

impl ToolInputSchema {
    pub fn empty_object() -> Self {
        Self {
            r#type: "object".to_string(),
            properties: None,
            required: None,
        }
    }

    /// Required parameter names, empty when the schema declares none.
    pub fn required_params(&self) -> &[String] {
        self.required.as_deref().unwrap_or(&[])
    }

    /// The schema node for one property, when present.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.as_ref()?.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(
        rename = "nextCursor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CallToolResult {
    pub content: Vec<Value>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![serde_json::json!({ "type": "text", "text": text.into() })],
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![serde_json::json!({ "type": "text", "text": text.into() })],
            is_error: Some(true),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Newline-joined text of every `text` content block. Other block types
    /// are opaque and skipped.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if block.get("type").and_then(|v| v.as_str()) != Some("text") {
                continue;
            }
            let Some(text) = block.get("text").and_then(|v| v.as_str()) else {
                continue;
            };
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
        out
    }
}

/// A tool descriptor plus its owning upstream and flat wire name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespacedTool {
    pub server_name: String,
    pub namespaced_name: String,
    pub tool: Tool,
}

impl NamespacedTool {
    pub fn original_name(&self) -> &str {
        &self.tool.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_schema_type_defaults_to_object() {
        let schema: ToolInputSchema = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(schema.r#type, "object");
        assert!(schema.required_params().is_empty());
    }

    #[test]
    fn tool_schema_round_trips_unknown_property_nodes() {
        let raw = serde_json::json!({
            "name": "run_tests",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "filter": { "type": "string", "default": "*", "x-vendor": [1, 2] }
                },
                "required": ["filter"]
            }
        });
        let tool: Tool = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&tool).unwrap(), raw);
    }

    #[test]
    fn text_content_joins_only_text_blocks() {
        let result = CallToolResult {
            content: vec![
                serde_json::json!({ "type": "text", "text": "a" }),
                serde_json::json!({ "type": "image", "data": "..." }),
                serde_json::json!({ "type": "text", "text": "b" }),
            ],
            is_error: None,
        };
        assert_eq!(result.text_content(), "a\nb");
    }
}
