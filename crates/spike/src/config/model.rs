use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::filter::ToolFilter;

/// One configured upstream. The discriminant is the transport.
///
/// Structural equality (the derived `PartialEq`) is what `apply_config_diff`
/// uses to decide whether an upstream changed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum UpstreamConfig {
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tools: Option<ToolFilter>,
    },
    StreamableHttp {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tools: Option<ToolFilter>,
    },
    Sse {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tools: Option<ToolFilter>,
    },
}

impl UpstreamConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args,
            env: BTreeMap::new(),
            tools: None,
        }
    }

    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self::StreamableHttp {
            url: url.into(),
            env: BTreeMap::new(),
            tools: None,
        }
    }

    pub fn sse(url: impl Into<String>) -> Self {
        Self::Sse {
            url: url.into(),
            env: BTreeMap::new(),
            tools: None,
        }
    }

    pub fn transport_tag(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::StreamableHttp { .. } => "streamable_http",
            Self::Sse { .. } => "sse",
        }
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Stdio { env, .. } | Self::StreamableHttp { env, .. } | Self::Sse { env, .. } => {
                env
            }
        }
    }

    pub fn env_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            Self::Stdio { env, .. } | Self::StreamableHttp { env, .. } | Self::Sse { env, .. } => {
                env
            }
        }
    }

    pub fn tools_filter(&self) -> Option<&ToolFilter> {
        match self {
            Self::Stdio { tools, .. }
            | Self::StreamableHttp { tools, .. }
            | Self::Sse { tools, .. } => tools.as_ref(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::StreamableHttp { url, .. } | Self::Sse { url, .. } => Some(url.as_str()),
            Self::Stdio { .. } => None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Self::Stdio { command, env, .. } => {
                if command.trim().is_empty() {
                    anyhow::bail!("upstream transport=stdio: command must not be empty");
                }
                for key in env.keys() {
                    if key.trim().is_empty() {
                        anyhow::bail!("upstream transport=stdio: env key must not be empty");
                    }
                }
            }
            Self::StreamableHttp { url, .. } | Self::Sse { url, .. } => {
                if url.trim().is_empty() {
                    anyhow::bail!(
                        "upstream transport={}: url must not be empty",
                        self.transport_tag()
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsetConfig {
    pub servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The merged result of config discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConfig {
    /// Upstream name -> config, in stable (sorted) order.
    pub upstreams: BTreeMap<String, UpstreamConfig>,
    pub toolsets: BTreeMap<String, ToolsetConfig>,
    pub lazy_loading: bool,
    /// Files that contributed to this config, in load order.
    pub sources: Vec<PathBuf>,
}

impl ResolvedConfig {
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.get(name)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, upstream) in &self.upstreams {
            upstream
                .validate()
                .map_err(|err| err.context(format!("invalid upstream config: {name}")))?;
        }
        for (name, toolset) in &self.toolsets {
            if toolset.servers.is_empty() {
                anyhow::bail!("toolset {name}: servers must not be empty");
            }
        }
        Ok(())
    }
}
