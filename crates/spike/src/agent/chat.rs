//! The streaming-chat abstraction consumed by the agent loop, and the
//! message model it operates on. The concrete LLM vendor SDK lives behind
//! `ChatClient`; the loop only sees content-block events and text deltas.

use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::NamespacedTool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }
}

/// A tool as handed to the LLM vendor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Converts a catalog entry to the vendor shape, forcing the top-level
    /// schema `type` to `object` (some upstreams omit it).
    pub fn from_catalog(entry: &NamespacedTool) -> Self {
        let mut input_schema =
            serde_json::to_value(&entry.tool.input_schema).unwrap_or_else(|_| {
                serde_json::json!({ "type": "object" })
            });
        if let Some(map) = input_schema.as_object_mut() {
            map.insert("type".to_string(), Value::String("object".to_string()));
        }
        Self {
            name: entry.namespaced_name.clone(),
            description: entry
                .tool
                .description
                .clone()
                .unwrap_or_else(|| entry.tool.name.clone()),
            input_schema,
        }
    }
}

/// Events produced while draining one assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text, forwarded to the caller as it arrives.
    TextDelta(String),
    /// A completed content block of the assistant message.
    ContentBlock(ContentBlock),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// Single-method streaming-chat abstraction over the vendor SDK.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn create_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ChatStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{Tool, ToolInputSchema};

    #[test]
    fn tool_definition_forces_object_type() {
        let entry = NamespacedTool {
            server_name: "vitest".to_string(),
            namespaced_name: "vitest__run_tests".to_string(),
            tool: Tool {
                name: "run_tests".to_string(),
                description: None,
                input_schema: ToolInputSchema {
                    r#type: String::new(),
                    properties: None,
                    required: None,
                },
            },
        };
        let def = ToolDefinition::from_catalog(&entry);
        assert_eq!(def.name, "vitest__run_tests");
        // Missing description falls back to the original tool name.
        assert_eq!(def.description, "run_tests");
        assert_eq!(def.input_schema["type"], "object");
    }

    #[test]
    fn content_blocks_serialize_with_type_tags() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "t1".to_string(),
            content: "3 tests passed".to_string(),
            is_error: false,
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            serde_json::json!({
                "type": "tool_result",
                "tool_use_id": "t1",
                "content": "3 tests passed",
                "is_error": false,
            })
        );
    }
}
