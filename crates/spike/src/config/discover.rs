//! Layered config discovery.
//!
//! Layers, later wins per upstream name:
//! 1. `<home>/.mcp.json`
//! 2. `<cwd>/.mcp.json`
//! 3. explicit `--config` path, resolved against cwd
//! 4. inline `name=command args...` additions (stdio)
//! 5. inline `name=url` additions (streamable http)
//!
//! Invalid files warn and are skipped; discovery never aborts on them.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use super::file_format::ConfigFile;
use super::model::{ResolvedConfig, UpstreamConfig};
use super::{AUTH_TOKEN_ENV, MAX_CONFIG_BYTES, SPIKE_LAND_SERVER};

const CONFIG_FILE_NAME: &str = ".mcp.json";

/// Access token material held by the out-of-scope credential store.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub access_token: String,
}

/// External credential store collaborator. The core only asks whether a valid
/// token is currently available.
pub trait CredentialStore: Send + Sync {
    fn auth_token(&self) -> Option<AuthToken>;
}

/// Credential store that never has a token.
pub struct NoCredentials;

impl CredentialStore for NoCredentials {
    fn auth_token(&self) -> Option<AuthToken> {
        None
    }
}

/// Credential store backed by the process environment. Stand-in for the
/// external keychain-backed store the CLI normally wires up.
pub struct EnvCredentials;

impl CredentialStore for EnvCredentials {
    fn auth_token(&self) -> Option<AuthToken> {
        let access_token = std::env::var(AUTH_TOKEN_ENV).ok()?;
        if access_token.trim().is_empty() {
            return None;
        }
        Some(AuthToken { access_token })
    }
}

#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    pub home_dir: Option<PathBuf>,
    pub cwd: PathBuf,
    /// Explicit config path (absolute or relative to cwd).
    pub config_path: Option<PathBuf>,
    /// Inline `name=command args...` / `name=url` additions, applied last.
    pub inline_servers: Vec<String>,
    /// Base URL used for the injected first-party upstream.
    pub base_url: String,
}

impl DiscoverOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: std::env::var_os("HOME").map(PathBuf::from),
            cwd: cwd.into(),
            config_path: None,
            inline_servers: Vec::new(),
            base_url: "https://spike.land".to_string(),
        }
    }
}

pub async fn discover(
    options: &DiscoverOptions,
    credentials: &dyn CredentialStore,
) -> anyhow::Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(home) = &options.home_dir {
        candidates.push(home.join(CONFIG_FILE_NAME));
    }
    candidates.push(options.cwd.join(CONFIG_FILE_NAME));
    if let Some(path) = &options.config_path {
        let path = if path.is_absolute() {
            path.clone()
        } else {
            options.cwd.join(path)
        };
        candidates.push(path);
    }

    for path in candidates {
        match load_config_file(&path).await {
            Ok(Some(file)) => {
                merge_file(&mut resolved, file);
                resolved.sources.push(path);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("skipping config {}: {err:#}", path.display());
            }
        }
    }

    for spec in &options.inline_servers {
        match parse_inline_server(spec) {
            Ok((name, config)) => {
                resolved.upstreams.insert(name, config);
            }
            Err(err) => {
                warn!("skipping inline server {spec:?}: {err:#}");
            }
        }
    }

    expand_all_env(&mut resolved);
    inject_spike_land(&mut resolved, options, credentials);
    resolved.validate()?;
    Ok(resolved)
}

async fn load_config_file(path: &Path) -> anyhow::Result<Option<ConfigFile>> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
    };
    if !meta.is_file() {
        anyhow::bail!("config must be a regular file: {}", path.display());
    }
    if meta.len() > MAX_CONFIG_BYTES {
        anyhow::bail!(
            "config too large: {} bytes (max {}): {}",
            meta.len(),
            MAX_CONFIG_BYTES,
            path.display()
        );
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let file: ConfigFile =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(file))
}

fn merge_file(resolved: &mut ResolvedConfig, file: ConfigFile) {
    for (name, entry) in file.mcp_servers {
        match entry.into_config(&name) {
            Ok(config) => {
                resolved.upstreams.insert(name, config);
            }
            Err(err) => {
                warn!("skipping server {name}: {err:#}");
            }
        }
    }
    for (name, toolset) in file.toolsets {
        resolved.toolsets.insert(name, toolset);
    }
    if let Some(lazy_loading) = file.lazy_loading {
        resolved.lazy_loading = lazy_loading;
    }
}

/// Parses an inline server addition: `name=url` (streamable http) or
/// `name=command arg1 arg2...` (stdio, whitespace-split).
pub fn parse_inline_server(spec: &str) -> anyhow::Result<(String, UpstreamConfig)> {
    let (name, rest) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected name=command or name=url"))?;
    let name = name.trim();
    let rest = rest.trim();
    if name.is_empty() {
        anyhow::bail!("server name must not be empty");
    }
    if rest.is_empty() {
        anyhow::bail!("server value must not be empty");
    }

    if rest.starts_with("http://") || rest.starts_with("https://") {
        return Ok((name.to_string(), UpstreamConfig::streamable_http(rest)));
    }

    let mut parts = rest.split_whitespace();
    let Some(command) = parts.next() else {
        anyhow::bail!("server command must not be empty");
    };
    let args: Vec<String> = parts.map(str::to_string).collect();
    Ok((name.to_string(), UpstreamConfig::stdio(command, args)))
}

fn expand_all_env(resolved: &mut ResolvedConfig) {
    for (name, upstream) in resolved.upstreams.iter_mut() {
        let env = upstream.env_mut();
        for (key, value) in env.iter_mut() {
            let mut missing = Vec::new();
            let expanded = expand_env_refs(value, |var| std::env::var(var).ok(), &mut missing);
            for var in missing {
                warn!("upstream {name}: env[{key}] references unset variable {var}");
            }
            *value = expanded;
        }
    }
}

/// Replaces every `${VAR}` substring with `lookup(VAR)`, or the empty string
/// when unset (the variable name is appended to `missing`). Text that is not
/// a well-formed reference passes through unchanged.
pub fn expand_env_refs(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
    missing: &mut Vec<String>,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if is_env_var_name(name) {
            match lookup(name) {
                Some(value) => out.push_str(&value),
                None => missing.push(name.to_string()),
            }
        } else {
            out.push_str(&rest[start..start + 2 + end + 1]);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn is_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn inject_spike_land(
    resolved: &mut ResolvedConfig,
    options: &DiscoverOptions,
    credentials: &dyn CredentialStore,
) {
    if resolved.upstreams.contains_key(SPIKE_LAND_SERVER) {
        return;
    }
    let Some(token) = credentials.auth_token() else {
        return;
    };

    let mut config =
        UpstreamConfig::streamable_http(format!("{}/api/mcp", options.base_url.trim_end_matches('/')));
    config
        .env_mut()
        .insert(AUTH_TOKEN_ENV.to_string(), token.access_token);
    resolved
        .upstreams
        .insert(SPIKE_LAND_SERVER.to_string(), config);
}
