//! Debounced hot reload of the discovered config files.
//!
//! The watcher polls the mtimes of every file that successfully loaded.
//! Events inside the debounce window collapse into a single re-discovery,
//! whose result is delivered to the change sink.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::discover::{discover, CredentialStore, DiscoverOptions};
use super::model::ResolvedConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

pub struct ConfigWatcher {
    task: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    /// Starts watching the files listed in `initial.sources`. Each debounced
    /// change re-runs discovery and sends the new config on the returned
    /// channel. The watcher follows the file set of the most recent
    /// successful discovery.
    pub fn spawn(
        initial: &ResolvedConfig,
        options: DiscoverOptions,
        credentials: Arc<dyn CredentialStore>,
        debounce: Duration,
    ) -> (Self, mpsc::Receiver<ResolvedConfig>) {
        let (tx, rx) = mpsc::channel(4);
        let mut watched = initial.sources.clone();

        let task = tokio::spawn(async move {
            let mut mtimes = snapshot_mtimes(&watched).await;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                let current = snapshot_mtimes(&watched).await;
                if current == mtimes {
                    continue;
                }

                // Collapse the burst: absorb further events for the debounce
                // window, then reload once.
                debug!("config change detected, reloading after {debounce:?}");
                tokio::time::sleep(debounce).await;
                mtimes = snapshot_mtimes(&watched).await;

                match discover(&options, credentials.as_ref()).await {
                    Ok(config) => {
                        watched = config.sources.clone();
                        if tx.send(config).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("config reload failed: {err:#}");
                    }
                }
            }
        });

        (Self { task }, rx)
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn snapshot_mtimes(paths: &[PathBuf]) -> HashMap<PathBuf, Option<SystemTime>> {
    let mut out = HashMap::with_capacity(paths.len());
    for path in paths {
        let mtime = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok());
        out.insert(path.clone(), mtime);
    }
    out
}
