//! Toolset lazy-loading: whole groups of upstream tools stay hidden until a
//! containing toolset is loaded through one of the synthetic meta-tools.
//!
//! The meta-tools let an LLM discover and page in capabilities on demand,
//! bounding prompt growth by the tools it actually needs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::config::ToolsetConfig;
use crate::mcp::{CallToolResult, NamespacedTool, Tool, ToolInputSchema};
use crate::META_SERVER_NAME;

pub const LIST_TOOLSETS: &str = "spike__list_toolsets";
pub const LOAD_TOOLSET: &str = "spike__load_toolset";
pub const UNLOAD_TOOLSET: &str = "spike__unload_toolset";

#[derive(Debug, thiserror::Error)]
#[error("unknown toolset: {0}")]
pub struct UnknownToolset(pub String);

#[derive(Debug, Default)]
pub struct ToolsetController {
    toolsets: BTreeMap<String, ToolsetConfig>,
    loaded: BTreeSet<String>,
}

impl ToolsetController {
    pub fn new(toolsets: BTreeMap<String, ToolsetConfig>) -> Self {
        Self {
            toolsets,
            loaded: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.toolsets.is_empty()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    /// A server is visible iff it belongs to no toolset, or at least one
    /// containing toolset is currently loaded.
    pub fn is_visible(&self, server: &str) -> bool {
        let mut member_of_any = false;
        for (name, toolset) in &self.toolsets {
            if toolset.servers.iter().any(|s| s == server) {
                member_of_any = true;
                if self.loaded.contains(name) {
                    return true;
                }
            }
        }
        !member_of_any
    }

    pub fn load_toolset(&mut self, name: &str) -> Result<&ToolsetConfig, UnknownToolset> {
        let Some(toolset) = self.toolsets.get(name) else {
            return Err(UnknownToolset(name.to_string()));
        };
        self.loaded.insert(name.to_string());
        Ok(toolset)
    }

    pub fn unload_toolset(&mut self, name: &str) -> Result<bool, UnknownToolset> {
        if !self.toolsets.contains_key(name) {
            return Err(UnknownToolset(name.to_string()));
        }
        Ok(self.loaded.remove(name))
    }

    pub fn is_meta_tool(&self, wire_name: &str) -> bool {
        matches!(wire_name, LIST_TOOLSETS | LOAD_TOOLSET | UNLOAD_TOOLSET)
    }

    /// The synthetic tools advertised alongside the upstream catalog, owned
    /// by the synthetic server name.
    pub fn meta_tools(&self) -> Vec<NamespacedTool> {
        let name_schema = ToolInputSchema {
            r#type: "object".to_string(),
            properties: Some(serde_json::json!({
                "name": { "type": "string", "description": "Toolset name" }
            })),
            required: Some(vec!["name".to_string()]),
        };

        let entries = [
            (
                LIST_TOOLSETS,
                "List available toolsets with their load state, member servers, and tool counts",
                ToolInputSchema::empty_object(),
            ),
            (
                LOAD_TOOLSET,
                "Load a toolset, making its servers' tools available",
                name_schema.clone(),
            ),
            (
                UNLOAD_TOOLSET,
                "Unload a previously loaded toolset",
                name_schema,
            ),
        ];

        entries
            .into_iter()
            .map(|(wire_name, description, input_schema)| NamespacedTool {
                server_name: META_SERVER_NAME.to_string(),
                namespaced_name: wire_name.to_string(),
                tool: Tool {
                    name: wire_name.to_string(),
                    description: Some(description.to_string()),
                    input_schema,
                },
            })
            .collect()
    }

    /// Dispatches a meta-tool call. `tool_counts` maps server name to the
    /// number of tools that server currently contributes.
    pub fn call_meta_tool(
        &mut self,
        wire_name: &str,
        arguments: &Value,
        tool_counts: &HashMap<String, usize>,
    ) -> CallToolResult {
        match wire_name {
            LIST_TOOLSETS => self.list_toolsets_result(tool_counts),
            LOAD_TOOLSET => {
                let Some(name) = arguments.get("name").and_then(|v| v.as_str()) else {
                    return CallToolResult::error("Missing required parameter: name");
                };
                match self.load_toolset(name) {
                    Ok(toolset) => {
                        let servers = toolset.servers.clone();
                        let total: usize = servers
                            .iter()
                            .map(|s| tool_counts.get(s).copied().unwrap_or(0))
                            .sum();
                        CallToolResult::text(format!(
                            "Loaded toolset {name}: servers [{}], {total} tools now available",
                            servers.join(", ")
                        ))
                    }
                    Err(err) => CallToolResult::error(format!("Error: {err}")),
                }
            }
            UNLOAD_TOOLSET => {
                let Some(name) = arguments.get("name").and_then(|v| v.as_str()) else {
                    return CallToolResult::error("Missing required parameter: name");
                };
                match self.unload_toolset(name) {
                    Ok(true) => CallToolResult::text(format!("Unloaded toolset {name}")),
                    Ok(false) => {
                        CallToolResult::error(format!("Error: toolset not loaded: {name}"))
                    }
                    Err(err) => CallToolResult::error(format!("Error: {err}")),
                }
            }
            other => CallToolResult::error(format!("Error: unknown meta-tool: {other}")),
        }
    }

    fn list_toolsets_result(&self, tool_counts: &HashMap<String, usize>) -> CallToolResult {
        let listing: Vec<Value> = self
            .toolsets
            .iter()
            .map(|(name, toolset)| {
                let tool_count: usize = toolset
                    .servers
                    .iter()
                    .map(|s| tool_counts.get(s).copied().unwrap_or(0))
                    .sum();
                let mut entry = serde_json::json!({
                    "name": name,
                    "loaded": self.loaded.contains(name),
                    "servers": toolset.servers,
                    "toolCount": tool_count,
                });
                if let Some(description) = &toolset.description {
                    entry["description"] = Value::String(description.clone());
                }
                entry
            })
            .collect();

        match serde_json::to_string_pretty(&listing) {
            Ok(text) => CallToolResult::text(text),
            Err(err) => CallToolResult::error(format!("Error: {err}")),
        }
    }
}
