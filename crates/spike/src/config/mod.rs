//! Config model, `.mcp.json` discovery layers, and hot reload.

mod discover;
mod file_format;
mod model;
mod watch;


pub use discover::{
    discover, expand_env_refs, parse_inline_server, AuthToken, CredentialStore, DiscoverOptions,
    EnvCredentials, NoCredentials,
};
pub use model::{ResolvedConfig, ToolsetConfig, UpstreamConfig};
pub use watch::{ConfigWatcher, DEFAULT_DEBOUNCE};

pub(crate) const MAX_CONFIG_BYTES: u64 = 4 * 1024 * 1024;

/// Name of the injected first-party upstream.
pub const SPIKE_LAND_SERVER: &str = "spike-land";

/// Env key that carries a bearer credential for http/sse upstreams.
pub const AUTH_TOKEN_ENV: &str = "SPIKE_AUTH_TOKEN";
