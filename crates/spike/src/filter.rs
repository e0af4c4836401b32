//! Glob-based allow/block filtering of a server's advertised tools.

use serde::{Deserialize, Serialize};

use crate::mcp::Tool;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<Vec<String>>,
}

impl ToolFilter {
    pub fn is_empty(&self) -> bool {
        self.allowed.is_none() && self.blocked.is_none()
    }

    /// True when `name` survives the filter: it matches at least one allowed
    /// pattern (when an allow list is present) and no blocked pattern.
    pub fn permits(&self, name: &str) -> bool {
        if let Some(allowed) = self.allowed.as_deref() {
            if !allowed.is_empty() && !allowed.iter().any(|p| glob_matches(p, name)) {
                return false;
            }
        }
        if let Some(blocked) = self.blocked.as_deref() {
            if blocked.iter().any(|p| glob_matches(p, name)) {
                return false;
            }
        }
        true
    }
}

/// Applies the filter to a tool list. An absent/empty filter passes everything
/// through unchanged. Idempotent.
pub fn filter_tools(tools: Vec<Tool>, filter: Option<&ToolFilter>) -> Vec<Tool> {
    let Some(filter) = filter else {
        return tools;
    };
    if filter.is_empty() {
        return tools;
    }
    tools
        .into_iter()
        .filter(|tool| filter.permits(&tool.name))
        .collect()
}

/// Anchored glob match where `*` matches any run of characters and every
/// other character is literal.
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    fn matches(pattern: &[u8], name: &[u8]) -> bool {
        match pattern.first() {
            None => name.is_empty(),
            Some(b'*') => {
                // `*` absorbs zero or more characters.
                (0..=name.len()).any(|skip| matches(&pattern[1..], &name[skip..]))
            }
            Some(ch) => name.first() == Some(ch) && matches(&pattern[1..], &name[1..]),
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}
