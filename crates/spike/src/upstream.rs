//! One upstream MCP server: transport construction, initialize handshake,
//! tool listing, call dispatch, close.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{UpstreamConfig, AUTH_TOKEN_ENV};
use crate::fleet::CallError;
use crate::mcp::{CallToolResult, ListToolsResult, Tool, MCP_PROTOCOL_VERSION};

/// Environment propagated to stdio children besides the config's own `env`.
/// Everything else from the parent process is withheld.
const STDIO_BASELINE_ENV_VARS: [&str; 5] = ["PATH", "HOME", "TMPDIR", "TEMP", "TMP"];

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Upstream {
    name: String,
    config: UpstreamConfig,
    client: Option<spike_jsonrpc::Client>,
    tools: Vec<Tool>,
    request_timeout: Duration,
}

impl Upstream {
    pub fn new(name: impl Into<String>, config: UpstreamConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client: None,
            tools: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn connected(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(|client| !client.is_closed())
    }

    /// Tools advertised at connect time (after the upstream's own filter has
    /// NOT been applied; filtering happens in the fleet's catalog).
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub async fn connect(&mut self) -> anyhow::Result<()> {
        if self.connected() {
            return Ok(());
        }

        let client = match self.build_client().await {
            Ok(client) => client,
            Err(err) => {
                let message = format!("{err:#}");
                if looks_like_auth_failure(&message) {
                    warn!(
                        "upstream {}: connect failed with an authentication error; \
                         check env.{AUTH_TOKEN_ENV}",
                        self.name
                    );
                }
                return Err(err).with_context(|| format!("connect upstream: {}", self.name));
            }
        };

        self.initialize(&client)
            .await
            .with_context(|| format!("initialize upstream: {}", self.name))?;

        let tools = self
            .fetch_tools(&client)
            .await
            .with_context(|| format!("list tools (upstream={})", self.name))?;
        if tools.is_empty() {
            // Common failure shape: the server answers but an expired or
            // missing credential hides every tool.
            warn!(
                "upstream {}: connected but advertises no tools (often an auth problem)",
                self.name
            );
        }
        debug!("upstream {}: connected with {} tools", self.name, tools.len());

        self.tools = tools;
        self.client = Some(client);
        Ok(())
    }

    async fn build_client(&self) -> anyhow::Result<spike_jsonrpc::Client> {
        match &self.config {
            UpstreamConfig::Stdio {
                command, args, env, ..
            } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                cmd.env_clear();
                for key in STDIO_BASELINE_ENV_VARS {
                    if let Some(value) = std::env::var_os(key) {
                        cmd.env(key, value);
                    }
                }
                for (key, value) in env {
                    cmd.env(key, value);
                }

                spike_jsonrpc::Client::spawn_command(cmd)
                    .await
                    .with_context(|| format!("spawn {command}"))
            }
            UpstreamConfig::StreamableHttp { url, env, .. } => {
                spike_jsonrpc::Client::connect_streamable_http(url, http_options(env, self.request_timeout))
                    .await
                    .context("connect streamable http")
            }
            UpstreamConfig::Sse { url, env, .. } => {
                spike_jsonrpc::Client::connect_sse(url, http_options(env, self.request_timeout))
                    .await
                    .context("connect sse")
            }
        }
    }

    async fn initialize(&self, client: &spike_jsonrpc::Client) -> anyhow::Result<()> {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "clientInfo": {
                "name": "spike",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        client
            .request_with_timeout("initialize", Some(params), self.request_timeout)
            .await
            .context("initialize request")?;
        client
            .notify("notifications/initialized", None)
            .await
            .context("initialized notification")?;
        Ok(())
    }

    async fn fetch_tools(&self, client: &spike_jsonrpc::Client) -> anyhow::Result<Vec<Tool>> {
        let result = client
            .request_with_timeout("tools/list", None, self.request_timeout)
            .await?;
        let listed: ListToolsResult =
            serde_json::from_value(result).context("deserialize tools/list result")?;
        Ok(listed.tools)
    }

    /// Attaches an already-connected JSON-RPC client and performs the MCP
    /// handshake. Used by in-process bridges and test harnesses.
    pub async fn attach_client(&mut self, client: spike_jsonrpc::Client) -> anyhow::Result<()> {
        self.initialize(&client)
            .await
            .with_context(|| format!("initialize upstream: {}", self.name))?;
        self.tools = self
            .fetch_tools(&client)
            .await
            .with_context(|| format!("list tools (upstream={})", self.name))?;
        self.client = Some(client);
        Ok(())
    }

    /// Re-issues `tools/list` and refreshes the cache.
    pub async fn refresh_tools(&mut self) -> anyhow::Result<&[Tool]> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("upstream not connected: {}", self.name))?;
        self.tools = self.fetch_tools(client).await?;
        Ok(&self.tools)
    }

    /// Calls a tool by its *upstream-local* name and returns the result
    /// verbatim, including `isError`.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<CallToolResult, CallError> {
        let client = match &self.client {
            Some(client) if !client.is_closed() => client,
            _ => return Err(CallError::NotConnected(self.name.clone())),
        };

        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        let result = client
            .request_with_timeout("tools/call", Some(params), self.request_timeout)
            .await
            .map_err(|err| CallError::Upstream {
                server: self.name.clone(),
                message: err.to_string(),
            })?;

        serde_json::from_value(result).map_err(|err| CallError::Upstream {
            server: self.name.clone(),
            message: format!("invalid tools/call result: {err}"),
        })
    }

    pub async fn close(&mut self) {
        self.tools.clear();
        if let Some(mut client) = self.client.take() {
            if let Err(err) = client.close(CLOSE_TIMEOUT).await {
                debug!("upstream {}: close: {err}", self.name);
            }
        }
    }
}

fn http_options(
    env: &std::collections::BTreeMap<String, String>,
    request_timeout: Duration,
) -> spike_jsonrpc::HttpOptions {
    let mut options = spike_jsonrpc::HttpOptions {
        request_timeout: Some(request_timeout),
        ..Default::default()
    };
    if let Some(token) = env.get(AUTH_TOKEN_ENV) {
        options
            .headers
            .insert("Authorization".to_string(), format!("Bearer {token}"));
    }
    options
}

fn looks_like_auth_failure(message: &str) -> bool {
    message.contains("401") || message.contains("403") || message.contains("Unauthorized")
}
