//! On-disk `.mcp.json` shapes, converted into the crate's config model.
//!
//! The file keeps the conventional MCP layout (`command`/`args` for stdio
//! servers, `url` for remote ones); the transport is inferred rather than
//! spelled out, with an optional `type` field to force `sse`.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::filter::ToolFilter;

use super::model::{ToolsetConfig, UpstreamConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConfigFile {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
    #[serde(default)]
    pub toolsets: BTreeMap<String, ToolsetConfig>,
    #[serde(default)]
    pub lazy_loading: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ServerEntry {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "type")]
    pub transport: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub tools: Option<ToolFilter>,
}

impl ServerEntry {
    pub(super) fn into_config(self, name: &str) -> anyhow::Result<UpstreamConfig> {
        let ServerEntry {
            command,
            args,
            url,
            transport,
            env,
            tools,
        } = self;

        match (command, url) {
            (Some(command), None) => {
                if matches!(transport.as_deref(), Some(t) if t != "stdio") {
                    anyhow::bail!("server {name}: type={} requires url", transport.unwrap());
                }
                Ok(UpstreamConfig::Stdio {
                    command,
                    args,
                    env,
                    tools,
                })
            }
            (None, Some(url)) => match transport.as_deref() {
                Some("sse") => Ok(UpstreamConfig::Sse { url, env, tools }),
                None | Some("http") | Some("streamable_http") | Some("streamable-http") => {
                    Ok(UpstreamConfig::StreamableHttp { url, env, tools })
                }
                Some(other) => anyhow::bail!("server {name}: unknown type: {other}"),
            },
            (Some(_), Some(_)) => {
                anyhow::bail!("server {name}: set either command or url, not both")
            }
            (None, None) => anyhow::bail!("server {name}: set command or url"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_entry_from_command() {
        let entry: ServerEntry = serde_json::from_value(serde_json::json!({
            "command": "vitest-mcp",
            "args": ["--stdio"],
            "env": { "NODE_ENV": "test" }
        }))
        .unwrap();
        let config = entry.into_config("vitest").unwrap();
        assert_eq!(
            config,
            UpstreamConfig::Stdio {
                command: "vitest-mcp".to_string(),
                args: vec!["--stdio".to_string()],
                env: [("NODE_ENV".to_string(), "test".to_string())].into(),
                tools: None,
            }
        );
    }

    #[test]
    fn url_entry_defaults_to_streamable_http() {
        let entry: ServerEntry = serde_json::from_value(serde_json::json!({
            "url": "https://mcp.example.com/mcp"
        }))
        .unwrap();
        assert_eq!(
            entry.into_config("remote").unwrap(),
            UpstreamConfig::streamable_http("https://mcp.example.com/mcp")
        );
    }

    #[test]
    fn explicit_sse_type() {
        let entry: ServerEntry = serde_json::from_value(serde_json::json!({
            "url": "https://mcp.example.com/sse",
            "type": "sse"
        }))
        .unwrap();
        assert_eq!(
            entry.into_config("legacy").unwrap(),
            UpstreamConfig::sse("https://mcp.example.com/sse")
        );
    }

    #[test]
    fn rejects_entry_with_neither_command_nor_url() {
        let entry = ServerEntry::default();
        assert!(entry.into_config("broken").is_err());
    }
}
