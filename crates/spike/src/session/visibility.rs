//! Which tools a session can currently see: prefix extraction, entry-point
//! and dependency classification, configuration prerequisites, and grouping
//! for display.

use crate::apps::AppRegistry;
use crate::mcp::NamespacedTool;
use crate::namespace::strip_server_prefix;

use super::state::SessionState;

/// Substrings that mark a tool as usable without prior session context.
const ENTRY_POINT_MARKERS: [&str; 5] = ["create", "list", "search", "get_status", "bootstrap"];

/// Gating tools and the (original-name) tools they gate. A gated tool stays
/// hidden until its gate has been invoked this session.
const CONFIG_PREREQUISITES: [(&str, &[&str]); 1] = [(
    "set_project_root",
    &["run_tests", "list_tests", "analyze_coverage"],
)];

/// Strips the owning server's prefix, when recognisable.
pub fn stripped_name<'a>(tool: &'a NamespacedTool, sep: &str) -> &'a str {
    strip_server_prefix(&tool.namespaced_name, &tool.server_name, sep)
}

/// The display prefix of a wire name: strip the server prefix, then take
/// everything before the first `_`. A name with no underscore is returned
/// unchanged, which intentionally coincides with the un-namespaced case.
pub fn tool_prefix<'a>(tool: &'a NamespacedTool, sep: &str) -> &'a str {
    let stripped = stripped_name(tool, sep);
    match stripped.find('_') {
        Some(idx) => &stripped[..idx],
        None => stripped,
    }
}

/// Entry points are callable without prior context: either the name signals
/// it, or the schema requires nothing.
pub fn is_entry_point(tool: &NamespacedTool) -> bool {
    let lowered = tool.namespaced_name.to_lowercase();
    if ENTRY_POINT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }
    tool.tool.input_schema.required_params().is_empty()
}

/// Dependent tools require at least one identifier produced elsewhere.
pub fn is_dependent(tool: &NamespacedTool) -> bool {
    tool.tool
        .input_schema
        .required_params()
        .iter()
        .any(|p| p.ends_with("_id"))
}

/// The gating tool for `original_name`, when it is gated.
pub fn gated_by(original_name: &str) -> Option<&'static str> {
    CONFIG_PREREQUISITES
        .iter()
        .find(|(_, gated)| gated.contains(&original_name))
        .map(|(gate, _)| *gate)
}

/// True for tools that unlock others once called.
pub fn is_config_prerequisite(original_name: &str) -> bool {
    CONFIG_PREREQUISITES
        .iter()
        .any(|(gate, _)| *gate == original_name)
}

/// The session-visibility decision for one tool.
pub fn is_visible(tool: &NamespacedTool, state: &SessionState, sep: &str) -> bool {
    if let Some(gate) = gated_by(tool.original_name()) {
        if !state.config_tool_called(gate) {
            return false;
        }
    }

    if is_entry_point(tool) {
        return true;
    }

    if is_dependent(tool) {
        let all_ids_seen = tool
            .tool
            .input_schema
            .required_params()
            .iter()
            .filter(|p| p.ends_with("_id"))
            .all(|p| state.latest_id(p).is_some());
        if all_ids_seen {
            return true;
        }
        // Fall back to create-style evidence under the tool's prefix.
        return state.has_created(tool_prefix(tool, sep));
    }

    true
}

/// One display group: visible tools (with a `(ready)` badge when callable
/// with no arguments) plus the count of tools hidden by the visibility rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolGroup {
    pub title: String,
    /// `(wire name, ready)` in catalog order.
    pub tools: Vec<(String, bool)>,
    pub hidden_count: usize,
}

impl ToolGroup {
    pub fn render(&self) -> String {
        let mut out = format!("{}:\n", self.title);
        for (name, ready) in &self.tools {
            if *ready {
                out.push_str(&format!("  {name} (ready)\n"));
            } else {
                out.push_str(&format!("  {name}\n"));
            }
        }
        if self.hidden_count > 0 {
            out.push_str(&format!(
                "  + {} more (use entry-point tools first)\n",
                self.hidden_count
            ));
        }
        out
    }
}

/// Groups the catalog for display: by app when the registry knows any of the
/// tools, by prefix otherwise.
pub fn group_tools(
    tools: &[NamespacedTool],
    state: &SessionState,
    registry: &AppRegistry,
    sep: &str,
) -> Vec<ToolGroup> {
    let mut groups: Vec<ToolGroup> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for tool in tools {
        let title = if registry.is_empty() {
            tool_prefix(tool, sep).to_string()
        } else {
            registry
                .app_for_tool(tool.original_name())
                .or_else(|| registry.app_for_tool(stripped_name(tool, sep)))
                .map(|app| app.name.clone())
                .unwrap_or_else(|| tool_prefix(tool, sep).to_string())
        };

        let idx = *index.entry(title.clone()).or_insert_with(|| {
            groups.push(ToolGroup {
                title,
                tools: Vec::new(),
                hidden_count: 0,
            });
            groups.len() - 1
        });

        if is_visible(tool, state, sep) {
            let ready = tool.tool.input_schema.required_params().is_empty();
            groups[idx].tools.push((tool.namespaced_name.clone(), ready));
        } else {
            groups[idx].hidden_count += 1;
        }
    }

    groups
}
