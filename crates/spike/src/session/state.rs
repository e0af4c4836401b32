//! Per-session bookkeeping: identifiers observed in tool results, create-style
//! evidence per prefix, and which configuration prerequisites have run.
//!
//! All three collections are append-only within a session.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct SessionState {
    /// Tool prefix -> identifiers observed when a create/bootstrap tool
    /// succeeded under that prefix.
    created: HashMap<String, Vec<String>>,
    /// Parameter name (`*_id` or bare `id`) -> every string value observed
    /// under that key in successful results, oldest first.
    ids_by_key: HashMap<String, Vec<String>>,
    /// Original tool names recognised as configuration prerequisites that
    /// have been invoked.
    config_tools_called: HashSet<String>,
}

impl SessionState {
    pub fn record_id(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.ids_by_key.entry(key.into()).or_default().push(value.into());
    }

    /// Most recently observed identifier under exactly this key.
    pub fn latest_id(&self, key: &str) -> Option<&str> {
        self.ids_by_key
            .get(key)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub fn record_created(&mut self, prefix: impl Into<String>, ids: Vec<String>) {
        self.created.entry(prefix.into()).or_default().extend(ids);
    }

    pub fn has_created(&self, prefix: &str) -> bool {
        self.created.get(prefix).is_some_and(|ids| !ids.is_empty())
    }

    pub fn created_ids(&self, prefix: &str) -> &[String] {
        self.created.get(prefix).map_or(&[], Vec::as_slice)
    }

    pub fn mark_config_tool_called(&mut self, original_name: impl Into<String>) {
        self.config_tools_called.insert(original_name.into());
    }

    pub fn config_tool_called(&self, original_name: &str) -> bool {
        self.config_tools_called.contains(original_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_id_is_the_most_recent() {
        let mut state = SessionState::default();
        assert!(state.latest_id("game_id").is_none());

        state.record_id("game_id", "g1");
        state.record_id("game_id", "g2");
        assert_eq!(state.latest_id("game_id"), Some("g2"));
    }

    #[test]
    fn created_is_append_only() {
        let mut state = SessionState::default();
        state.record_created("chess", vec!["g1".to_string()]);
        state.record_created("chess", vec!["g2".to_string()]);
        assert_eq!(state.created_ids("chess"), ["g1", "g2"]);
        assert!(state.has_created("chess"));
        assert!(!state.has_created("todo"));
    }
}
