//! The `status` probe: try every configured upstream with a bounded connect
//! and report the outcome.

use std::time::Duration;

use crate::config::ResolvedConfig;
use crate::upstream::Upstream;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct UpstreamStatus {
    pub name: String,
    /// Tool count on success, error text on failure.
    pub outcome: Result<usize, String>,
}

/// Probes every configured upstream concurrently, each attempt bounded by
/// `timeout`. The probe connections are closed before returning.
pub async fn probe_all(config: &ResolvedConfig, timeout: Duration) -> Vec<UpstreamStatus> {
    futures_util::future::join_all(config.upstreams.iter().map(|(name, upstream_config)| {
        let name = name.clone();
        let upstream_config = upstream_config.clone();
        async move {
            let mut upstream = Upstream::new(&name, upstream_config);
            let outcome = match tokio::time::timeout(timeout, upstream.connect()).await {
                Ok(Ok(())) => Ok(upstream.tools().len()),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(_) => Err(format!("timed out after {timeout:?}")),
            };
            upstream.close().await;
            UpstreamStatus { name, outcome }
        }
    }))
    .await
}
