//! Exponential-backoff reconnect policy.
//!
//! Pure policy layer: the actual reconnect action is an operator-supplied
//! callback; this module only owns timers and per-upstream attempt counts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::UpstreamConfig;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The reconnect action, typically wrapping `Fleet::reconnect`.
pub type ReconnectFn =
    Arc<dyn Fn(String, UpstreamConfig) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
struct Inner {
    attempts: HashMap<String, u32>,
    timers: HashMap<String, tokio::task::JoinHandle<()>>,
}

pub struct ReconnectScheduler {
    inner: Arc<Mutex<Inner>>,
    reconnect: ReconnectFn,
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl ReconnectScheduler {
    pub fn new(reconnect: ReconnectFn) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            reconnect,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before attempt `n`: `min(initial * 2^n, max)`.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn pending_count(&self) -> usize {
        let mut inner = self.lock();
        inner.timers.retain(|_, task| !task.is_finished());
        inner.timers.len()
    }

    pub fn attempts_for(&self, name: &str) -> u32 {
        self.lock().attempts.get(name).copied().unwrap_or(0)
    }

    /// True while a timer (or in-flight attempt) exists for `name`.
    pub fn has_pending(&self, name: &str) -> bool {
        self.lock()
            .timers
            .get(name)
            .is_some_and(|task| !task.is_finished())
    }

    /// True once the scheduler has exhausted its attempts for `name`.
    pub fn has_given_up(&self, name: &str) -> bool {
        self.attempts_for(name) >= self.max_attempts
    }

    /// Arms a reconnect timer for `name`. A pending timer for the same
    /// upstream is replaced. On success the attempt record is cleared; on
    /// failure the next attempt is scheduled until the cap is reached.
    pub fn schedule_reconnect(&self, name: impl Into<String>, config: UpstreamConfig) {
        let name = name.into();
        let start_attempt = {
            let mut inner = self.lock();
            if let Some(task) = inner.timers.remove(&name) {
                task.abort();
            }
            inner.attempts.get(&name).copied().unwrap_or(0)
        };

        if start_attempt >= self.max_attempts {
            error!(
                "upstream {name}: giving up after {} reconnect attempts",
                self.max_attempts
            );
            return;
        }

        let reconnect = self.reconnect.clone();
        let inner = self.inner.clone();
        let initial_delay = self.initial_delay;
        let max_delay = self.max_delay;
        let max_attempts = self.max_attempts;
        let task_name = name.clone();
        let task = tokio::spawn(async move {
            let mut attempt = start_attempt;
            loop {
                let factor = 1u32 << attempt.min(20);
                let delay = initial_delay.saturating_mul(factor).min(max_delay);
                tokio::time::sleep(delay).await;

                match reconnect(task_name.clone(), config.clone()).await {
                    Ok(()) => {
                        info!(
                            "upstream {task_name}: reconnected after {} attempt(s)",
                            attempt + 1
                        );
                        let mut inner = inner.lock().unwrap_or_else(|p| p.into_inner());
                        inner.attempts.remove(&task_name);
                        inner.timers.remove(&task_name);
                        return;
                    }
                    Err(err) => {
                        attempt += 1;
                        warn!(
                            "upstream {task_name}: reconnect attempt {attempt}/{max_attempts} failed: {err:#}"
                        );
                        let mut inner = inner.lock().unwrap_or_else(|p| p.into_inner());
                        inner.attempts.insert(task_name.clone(), attempt);
                        if attempt >= max_attempts {
                            // The record stays at the cap so callers can see
                            // the scheduler has given up on this upstream.
                            error!(
                                "upstream {task_name}: giving up after {max_attempts} reconnect attempts"
                            );
                            inner.timers.remove(&task_name);
                            return;
                        }
                    }
                }
            }
        });

        self.lock().timers.insert(name, task);
    }

    /// Cancels every pending timer. Attempt counts are kept.
    pub fn cancel_all(&self) {
        let mut inner = self.lock();
        for (_, task) in inner.timers.drain() {
            task.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn noop_scheduler() -> ReconnectScheduler {
        ReconnectScheduler::new(Arc::new(|_, _| Box::pin(async { Ok(()) })))
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let scheduler = noop_scheduler();
        assert_eq!(scheduler.calculate_backoff(0), Duration::from_secs(1));
        assert_eq!(scheduler.calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(scheduler.calculate_backoff(4), Duration::from_secs(16));
        assert_eq!(scheduler.calculate_backoff(5), Duration::from_secs(30));
        assert_eq!(scheduler.calculate_backoff(30), Duration::from_secs(30));

        // Monotone non-decreasing.
        for n in 0..12 {
            assert!(scheduler.calculate_backoff(n + 1) >= scheduler.calculate_backoff(n));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_the_attempt_record() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_fn = calls.clone();
        let scheduler = ReconnectScheduler::new(Arc::new(move |_, _| {
            calls_in_fn.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }));

        scheduler.schedule_reconnect("srv", UpstreamConfig::stdio("cmd", vec![]));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.attempts_for("srv"), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_until_the_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_fn = calls.clone();
        let scheduler = ReconnectScheduler::new(Arc::new(move |_, _| {
            calls_in_fn.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { anyhow::bail!("still down") })
        }))
        .with_max_attempts(3);

        scheduler.schedule_reconnect("srv", UpstreamConfig::stdio("cmd", vec![]));
        // Delays are 1s, 2s, 4s; leave headroom past the last attempt.
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler.has_given_up("srv"));

        // Re-scheduling after give-up is a no-op.
        scheduler.schedule_reconnect("srv", UpstreamConfig::stdio("cmd", vec![]));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_pending_timers() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_fn = calls.clone();
        let scheduler = ReconnectScheduler::new(Arc::new(move |_, _| {
            calls_in_fn.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }));

        scheduler.schedule_reconnect("a", UpstreamConfig::stdio("cmd", vec![]));
        scheduler.schedule_reconnect("b", UpstreamConfig::stdio("cmd", vec![]));
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_count(), 0);
    }
}
