#![forbid(unsafe_code)]

//! spike federates a set of upstream MCP tool servers behind a single MCP
//! endpoint, exposing the union of their tools under namespaced names.

pub mod agent;
pub mod apps;
pub mod config;
pub mod filter;
pub mod fleet;
pub mod mcp;
pub mod namespace;
pub mod reconnect;
pub mod server;
pub mod session;
pub mod status;
pub mod toolset;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{ResolvedConfig, ToolsetConfig, UpstreamConfig};
pub use fleet::{CallError, Fleet};
pub use mcp::{CallToolResult, NamespacedTool, Tool, ToolInputSchema};
pub use toolset::ToolsetController;
pub use upstream::Upstream;

/// Default separator between the server name and the tool name in wire names.
pub const DEFAULT_SEPARATOR: &str = "__";

/// Synthetic server name that owns the aggregator's own meta-tools.
pub const META_SERVER_NAME: &str = "spike";
