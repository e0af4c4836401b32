//! The upstream fleet: lifecycle, catalog assembly, and call routing for
//! every configured upstream MCP server.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ResolvedConfig, UpstreamConfig};
use crate::filter::filter_tools;
use crate::mcp::{CallToolResult, NamespacedTool};
use crate::namespace::{namespaced_name, parse_namespaced};
use crate::toolset::ToolsetController;
use crate::upstream::Upstream;
use crate::DEFAULT_SEPARATOR;

#[cfg(test)]
mod tests;

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("upstream not connected: {0}")]
    NotConnected(String),
    #[error("server not connected: {0}")]
    ServerNotConnected(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("cannot resolve tool name: {0}")]
    CannotResolve(String),
    #[error("toolset not loaded for server {server}; call spike__list_toolsets and load one first")]
    ToolsetNotLoaded { server: String },
    #[error("upstream {server}: {message}")]
    Upstream { server: String, message: String },
}

/// Result of applying a config diff: which upstream names were connected,
/// disconnected, or reconnected. `added` reflects only successful connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub struct Fleet {
    /// Insertion order is catalog order and `no_prefix` lookup order.
    upstreams: Vec<Upstream>,
    configs: BTreeMap<String, UpstreamConfig>,
    separator: String,
    no_prefix: bool,
    toolsets: Option<ToolsetController>,
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            upstreams: Vec::new(),
            configs: BTreeMap::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
            no_prefix: false,
            toolsets: None,
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_no_prefix(mut self, no_prefix: bool) -> Self {
        self.no_prefix = no_prefix;
        self
    }

    pub fn with_toolsets(mut self, controller: ToolsetController) -> Self {
        self.toolsets = Some(controller);
        self
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn toolsets_mut(&mut self) -> Option<&mut ToolsetController> {
        self.toolsets.as_mut()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.upstreams.iter().map(|u| u.name().to_string()).collect()
    }

    pub fn upstream(&self, name: &str) -> Option<&Upstream> {
        self.upstreams.iter().find(|u| u.name() == name)
    }

    fn upstream_index(&self, name: &str) -> Option<usize> {
        self.upstreams.iter().position(|u| u.name() == name)
    }

    /// Registers an already-constructed upstream (normally pre-connected by a
    /// test harness or bridge), replacing any existing entry with that name.
    pub fn attach_upstream(&mut self, upstream: Upstream) {
        self.configs
            .insert(upstream.name().to_string(), upstream.config().clone());
        match self.upstream_index(upstream.name()) {
            Some(idx) => self.upstreams[idx] = upstream,
            None => self.upstreams.push(upstream),
        }
    }

    /// Connects every upstream in `config` concurrently. Individual failures
    /// are logged and do not fail the call; failed upstreams are dropped from
    /// the fleet.
    pub async fn connect_all(&mut self, config: &ResolvedConfig) {
        let attempted = config.upstreams.len();
        let mut pending: Vec<Upstream> = config
            .upstreams
            .iter()
            .map(|(name, upstream_config)| Upstream::new(name, upstream_config.clone()))
            .collect();

        let results = futures_util::future::join_all(
            pending.iter_mut().map(|upstream| upstream.connect()),
        )
        .await;

        let mut connected = 0usize;
        for (upstream, result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    connected += 1;
                    self.attach_upstream(upstream);
                }
                Err(err) => {
                    warn!("upstream {}: connect failed: {err:#}", upstream.name());
                }
            }
        }
        info!("fleet: connected {connected}/{attempted} upstreams");
    }

    fn server_visible(&self, server: &str) -> bool {
        self.toolsets
            .as_ref()
            .map_or(true, |toolsets| toolsets.is_visible(server))
    }

    /// Tool count per upstream after filtering, ignoring toolset visibility
    /// (the listing meta-tool reports counts for unloaded toolsets too).
    pub fn tool_counts(&self) -> HashMap<String, usize> {
        self.upstreams
            .iter()
            .map(|upstream| {
                let count = upstream
                    .tools()
                    .iter()
                    .filter(|tool| {
                        upstream
                            .config()
                            .tools_filter()
                            .map_or(true, |f| f.permits(&tool.name))
                    })
                    .count();
                (upstream.name().to_string(), count)
            })
            .collect()
    }

    /// The current aggregated catalog: filtered, namespaced tools of every
    /// visible upstream, followed by the toolset meta-tools.
    pub fn all_tools(&self) -> Vec<NamespacedTool> {
        let mut out = Vec::new();
        for upstream in &self.upstreams {
            if !self.server_visible(upstream.name()) {
                continue;
            }
            let tools = filter_tools(
                upstream.tools().to_vec(),
                upstream.config().tools_filter(),
            );
            for tool in tools {
                let wire_name = if self.no_prefix {
                    tool.name.clone()
                } else {
                    namespaced_name(upstream.name(), &tool.name, &self.separator)
                };
                out.push(NamespacedTool {
                    server_name: upstream.name().to_string(),
                    namespaced_name: wire_name,
                    tool,
                });
            }
        }
        if let Some(toolsets) = &self.toolsets {
            out.extend(toolsets.meta_tools());
        }
        out
    }

    /// The server a wire name would be dispatched to, without calling it.
    pub fn owning_server(&self, wire_name: &str) -> Option<String> {
        if self
            .toolsets
            .as_ref()
            .is_some_and(|t| t.is_meta_tool(wire_name))
        {
            return Some(crate::META_SERVER_NAME.to_string());
        }
        if self.no_prefix {
            return self
                .upstreams
                .iter()
                .find(|u| u.tools().iter().any(|t| t.name == wire_name))
                .map(|u| u.name().to_string());
        }
        let known: Vec<String> = self.configs.keys().cloned().collect();
        parse_namespaced(wire_name, &known, &self.separator).map(|(server, _)| server.to_string())
    }

    /// Routes a tool call to its owning upstream (or the toolset controller)
    /// and returns the result verbatim, including `isError`.
    pub async fn call_tool(
        &mut self,
        wire_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, CallError> {
        if self
            .toolsets
            .as_ref()
            .is_some_and(|t| t.is_meta_tool(wire_name))
        {
            let counts = self.tool_counts();
            if let Some(toolsets) = self.toolsets.as_mut() {
                return Ok(toolsets.call_meta_tool(wire_name, &arguments, &counts));
            }
        }

        if self.no_prefix {
            for upstream in &self.upstreams {
                if !self.server_visible(upstream.name()) {
                    continue;
                }
                let advertised = upstream.tools().iter().any(|tool| {
                    tool.name == wire_name
                        && upstream
                            .config()
                            .tools_filter()
                            .map_or(true, |f| f.permits(&tool.name))
                });
                if advertised {
                    return upstream.call_tool(wire_name, arguments).await;
                }
            }
            return Err(CallError::ToolNotFound(wire_name.to_string()));
        }

        let known: Vec<String> = self.configs.keys().cloned().collect();
        let Some((server, tool)) = parse_namespaced(wire_name, &known, &self.separator) else {
            return Err(CallError::CannotResolve(wire_name.to_string()));
        };
        let server = server.to_string();
        let tool = tool.to_string();

        let Some(upstream) = self.upstream(&server) else {
            return Err(CallError::ServerNotConnected(server));
        };
        if !self.server_visible(&server) {
            return Err(CallError::ToolsetNotLoaded { server });
        }
        if let Some(filter) = upstream.config().tools_filter() {
            if !filter.permits(&tool) {
                return Err(CallError::ToolNotFound(wire_name.to_string()));
            }
        }

        upstream.call_tool(&tool, arguments).await
    }

    /// Closes any existing upstream under `name` and connects a fresh one.
    pub async fn reconnect(&mut self, name: &str, config: UpstreamConfig) -> anyhow::Result<()> {
        let position = self.upstream_index(name);
        if let Some(idx) = position {
            self.upstreams[idx].close().await;
        }

        let mut upstream = Upstream::new(name, config.clone());
        let result = upstream.connect().await;
        match result {
            Ok(()) => {
                self.configs.insert(name.to_string(), config);
                match position {
                    Some(idx) => self.upstreams[idx] = upstream,
                    None => self.upstreams.push(upstream),
                }
                Ok(())
            }
            Err(err) => {
                if let Some(idx) = position {
                    self.upstreams.remove(idx);
                }
                self.configs.remove(name);
                Err(err)
            }
        }
    }

    /// Closes and removes an upstream. No-op on unknown names.
    pub async fn disconnect_server(&mut self, name: &str) {
        if let Some(idx) = self.upstream_index(name) {
            let mut upstream = self.upstreams.remove(idx);
            upstream.close().await;
        }
        self.configs.remove(name);
    }

    /// Closes every upstream in parallel.
    pub async fn close_all(&mut self) {
        let mut upstreams = std::mem::take(&mut self.upstreams);
        futures_util::future::join_all(upstreams.iter_mut().map(|u| u.close())).await;
        self.configs.clear();
    }

    /// Applies the difference between the fleet's current configs and `new`:
    /// removed upstreams are disconnected, added ones connected, changed ones
    /// reconnected. Equality is structural over the config values.
    pub async fn apply_config_diff(&mut self, new: &ResolvedConfig) -> ConfigDiff {
        let candidate = diff_config_keys(&self.configs, &new.upstreams);
        let mut diff = ConfigDiff::default();

        for name in candidate.removed {
            self.disconnect_server(&name).await;
            diff.removed.push(name);
        }
        for name in candidate.added {
            let config = new.upstreams[&name].clone();
            match self.reconnect(&name, config).await {
                Ok(()) => diff.added.push(name),
                Err(err) => {
                    warn!("upstream {name}: connect failed: {err:#}");
                }
            }
        }
        for name in candidate.changed {
            let config = new.upstreams[&name].clone();
            match self.reconnect(&name, config).await {
                Ok(()) => diff.changed.push(name),
                Err(err) => {
                    warn!("upstream {name}: reconnect failed: {err:#}");
                }
            }
        }

        if !diff.is_empty() {
            info!(
                "fleet: config diff applied (added={:?} removed={:?} changed={:?})",
                diff.added, diff.removed, diff.changed
            );
        }
        diff
    }
}

/// Set-theoretic diff over upstream names: `removed = old \ new`,
/// `added = new \ old`, `changed` = present in both with structurally
/// different configs.
pub fn diff_config_keys(
    old: &BTreeMap<String, UpstreamConfig>,
    new: &BTreeMap<String, UpstreamConfig>,
) -> ConfigDiff {
    let mut diff = ConfigDiff::default();
    for name in old.keys() {
        if !new.contains_key(name) {
            diff.removed.push(name.clone());
        }
    }
    for (name, config) in new {
        match old.get(name) {
            None => diff.added.push(name.clone()),
            Some(existing) if existing != config => diff.changed.push(name.clone()),
            Some(_) => {}
        }
    }
    diff
}
