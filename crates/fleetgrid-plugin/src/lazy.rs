//! Lazily connected group plugin.
//!
//! `LazyGroup` defers finding a remote group plugin until the first call,
//! so callers can be wired up before the plugin is running. Once found,
//! the connection is cached and every call is forwarded as-is; a dropped
//! connection is not re-established (build a new `LazyGroup` for that).
//!
//! ```text
//! call ──► cached? ──yes──► forward
//!             │no
//!             ▼
//!          finder() ──ok──► cache, forward
//!             │err
//!             ├─ retry == 0 ──► return err
//!             └─ tick / cancel ──► finder() again | "cancelled"
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleet_core::{GroupSpec, InstanceId};

use crate::error::{PluginError, PluginResult};
use crate::group::{GroupDescription, GroupPlugin};

type BoxFuture =
    Pin<Box<dyn Future<Output = PluginResult<Arc<dyn GroupPlugin>>> + Send>>;

/// Locates the remote group plugin.
pub type Finder = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// A `GroupPlugin` that connects on first use.
pub struct LazyGroup {
    finder: Finder,
    retry: Duration,
    client: Mutex<Option<Arc<dyn GroupPlugin>>>,
    cancel: watch::Sender<bool>,
}

impl LazyGroup {
    /// Wrap `finder`. A zero `retry` fails fast on the first finder error.
    pub fn new(finder: Finder, retry: Duration) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            finder,
            retry,
            client: Mutex::new(None),
            cancel,
        }
    }

    /// Abort every caller blocked waiting for the plugin to appear.
    ///
    /// Cancellation is permanent: later calls that would have to wait fail
    /// with `PluginError::Cancelled` as well.
    pub fn cancel_wait(&self) {
        self.cancel.send_replace(true);
    }

    async fn connect(&self) -> PluginResult<Arc<dyn GroupPlugin>> {
        let mut cancel = self.cancel.subscribe();
        let mut client = tokio::select! {
            biased;
            client = self.client.lock() => client,
            _ = cancelled(&mut cancel) => return Err(PluginError::Cancelled),
        };
        if let Some(connected) = client.as_ref() {
            return Ok(connected.clone());
        }

        let found = match self.find(&mut cancel).await {
            Ok(plugin) => plugin,
            Err(e) if self.retry.is_zero() || e == PluginError::Cancelled => return Err(e),
            Err(e) => {
                warn!(error = %e, retry = ?self.retry, "group plugin unavailable, retrying");
                let mut ticker = tokio::time::interval_at(Instant::now() + self.retry, self.retry);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => return Err(PluginError::Cancelled),
                        _ = ticker.tick() => {}
                    }
                    match self.find(&mut cancel).await {
                        Ok(plugin) => break plugin,
                        Err(PluginError::Cancelled) => return Err(PluginError::Cancelled),
                        Err(e) => debug!(error = %e, "group plugin still unavailable"),
                    }
                }
            }
        };

        info!("connected to group plugin");
        *client = Some(found.clone());
        Ok(found)
    }

    /// One finder attempt, abandoned on cancellation.
    async fn find(&self, cancel: &mut watch::Receiver<bool>) -> PluginResult<Arc<dyn GroupPlugin>> {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(PluginError::Cancelled),
            found = (self.finder)() => found,
        }
    }
}

/// Resolves once `cancel_wait` has been called.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl GroupPlugin for LazyGroup {
    async fn commit_group(&self, spec: GroupSpec, pretend: bool) -> PluginResult<String> {
        self.connect().await?.commit_group(spec, pretend).await
    }

    async fn free_group(&self, id: &str) -> PluginResult<()> {
        self.connect().await?.free_group(id).await
    }

    async fn describe_group(&self, id: &str) -> PluginResult<GroupDescription> {
        self.connect().await?.describe_group(id).await
    }

    async fn destroy_group(&self, id: &str) -> PluginResult<()> {
        self.connect().await?.destroy_group(id).await
    }

    async fn inspect_groups(&self) -> PluginResult<Vec<GroupSpec>> {
        self.connect().await?.inspect_groups().await
    }

    async fn destroy_instances(&self, id: &str, instances: &[InstanceId]) -> PluginResult<()> {
        self.connect().await?.destroy_instances(id, instances).await
    }

    async fn size(&self, id: &str) -> PluginResult<u32> {
        self.connect().await?.size(id).await
    }

    async fn set_size(&self, id: &str, size: u32) -> PluginResult<()> {
        self.connect().await?.set_size(id, size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Group plugin that only counts `size` calls.
    #[derive(Default)]
    struct CountingGroup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GroupPlugin for CountingGroup {
        async fn commit_group(&self, _: GroupSpec, _: bool) -> PluginResult<String> {
            Ok("Noop".to_string())
        }
        async fn free_group(&self, _: &str) -> PluginResult<()> {
            Ok(())
        }
        async fn describe_group(&self, _: &str) -> PluginResult<GroupDescription> {
            Ok(GroupDescription::default())
        }
        async fn destroy_group(&self, _: &str) -> PluginResult<()> {
            Ok(())
        }
        async fn inspect_groups(&self) -> PluginResult<Vec<GroupSpec>> {
            Ok(Vec::new())
        }
        async fn destroy_instances(&self, _: &str, _: &[InstanceId]) -> PluginResult<()> {
            Ok(())
        }
        async fn size(&self, _: &str) -> PluginResult<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        }
        async fn set_size(&self, _: &str, _: u32) -> PluginResult<()> {
            Ok(())
        }
    }

    /// Finder that fails `failures` times before returning `plugin`.
    fn flaky_finder(
        failures: usize,
        plugin: Arc<CountingGroup>,
        attempts: Arc<AtomicUsize>,
    ) -> Finder {
        Arc::new(move || {
            let plugin = plugin.clone();
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let found: BoxFuture = Box::pin(async move {
                if attempt < failures {
                    Err(PluginError::Connect(format!("attempt {attempt}")))
                } else {
                    Ok(plugin as Arc<dyn GroupPlugin>)
                }
            });
            found
        })
    }

    #[tokio::test]
    async fn retries_until_found_then_forwards_once() {
        let plugin = Arc::new(CountingGroup::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let lazy = LazyGroup::new(
            flaky_finder(3, plugin.clone(), attempts.clone()),
            Duration::from_millis(5),
        );

        assert_eq!(lazy.size("workers").await.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);

        // Connection is cached.
        assert_eq!(lazy.size("workers").await.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_retry_returns_first_error() {
        let plugin = Arc::new(CountingGroup::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let lazy = LazyGroup::new(
            flaky_finder(1, plugin.clone(), attempts.clone()),
            Duration::ZERO,
        );

        let err = lazy.size("workers").await.unwrap_err();
        assert_eq!(err, PluginError::Connect("attempt 0".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 0);

        // The next call tries again and now succeeds.
        assert_eq!(lazy.size("workers").await.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_releases_a_hung_finder() {
        let finder: Finder = Arc::new(|| {
            let found: BoxFuture = Box::pin(std::future::pending());
            found
        });
        let lazy = Arc::new(LazyGroup::new(finder, Duration::ZERO));

        // One caller stuck in the finder, one queued behind it.
        let callers: Vec<_> = (0..2)
            .map(|_| {
                let lazy = lazy.clone();
                tokio::spawn(async move { lazy.size("workers").await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        lazy.cancel_wait();

        for caller in callers {
            let result = tokio::time::timeout(Duration::from_secs(1), caller)
                .await
                .expect("caller should be released")
                .unwrap();
            assert_eq!(result.unwrap_err(), PluginError::Cancelled);
        }
    }

    #[tokio::test]
    async fn cancel_unblocks_waiting_callers() {
        let plugin = Arc::new(CountingGroup::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let lazy = Arc::new(LazyGroup::new(
            flaky_finder(usize::MAX, plugin, attempts),
            Duration::from_millis(10),
        ));

        let waiting = {
            let lazy = lazy.clone();
            tokio::spawn(async move { lazy.describe_group("workers").await })
        };

        tokio::time::sleep(Duration::from_millis(35)).await;
        lazy.cancel_wait();

        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("caller should be released")
            .unwrap();
        assert_eq!(result.unwrap_err(), PluginError::Cancelled);

        // Cancellation sticks for later callers too.
        assert_eq!(lazy.size("workers").await.unwrap_err(), PluginError::Cancelled);
    }
}
