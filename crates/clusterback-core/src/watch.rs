//! Watch coordinator: one change subscription per resource kind.
//!
//! Each kind gets its own task. A task forwards every change event to the
//! debounce gate and resubscribes after a back-off whenever its stream ends
//! or fails. Tasks share nothing but the gate.

use crate::debounce::DebounceGate;
use crate::provider::ResourceProvider;
use crate::resource::ResourceKind;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default pause before resubscribing to a closed stream.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Per-kind counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    /// Subscriptions opened successfully.
    pub subscriptions: u64,
    /// Change events received.
    pub events: u64,
    /// Captures that created a version.
    pub versions_created: u64,
}

/// Counters for a running coordinator, shared with its tasks.
#[derive(Debug, Default)]
pub struct WatchStats {
    kinds: Mutex<HashMap<ResourceKind, KindStats>>,
}

impl WatchStats {
    /// Snapshot of the counters for one kind.
    pub fn kind(&self, kind: &ResourceKind) -> KindStats {
        self.lock().get(kind).copied().unwrap_or_default()
    }

    fn update(&self, kind: &ResourceKind, f: impl FnOnce(&mut KindStats)) {
        f(self.lock().entry(kind.clone()).or_default());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ResourceKind, KindStats>> {
        self.kinds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Starts per-kind watch tasks.
pub struct WatchCoordinator {
    provider: Arc<dyn ResourceProvider>,
    gate: Arc<DebounceGate>,
    restart_backoff: Duration,
}

impl WatchCoordinator {
    pub fn new(provider: Arc<dyn ResourceProvider>, gate: Arc<DebounceGate>) -> Self {
        Self {
            provider,
            gate,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }

    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Spawn one task per kind and return a handle to them.
    pub fn start(&self, kinds: impl IntoIterator<Item = ResourceKind>) -> WatchHandle {
        let token = CancellationToken::new();
        let stats = Arc::new(WatchStats::default());
        let mut tasks = Vec::new();

        for kind in kinds {
            let task = KindWatch {
                kind: kind.clone(),
                provider: self.provider.clone(),
                gate: self.gate.clone(),
                restart_backoff: self.restart_backoff,
                token: token.child_token(),
                stats: stats.clone(),
            };
            tasks.push((kind, tokio::spawn(task.run())));
        }

        info!(kinds = tasks.len(), "Watch coordinator started");
        WatchHandle {
            token,
            tasks,
            stats,
        }
    }
}

/// Handle to running watch tasks.
pub struct WatchHandle {
    token: CancellationToken,
    tasks: Vec<(ResourceKind, JoinHandle<()>)>,
    stats: Arc<WatchStats>,
}

impl WatchHandle {
    /// Kinds being watched.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.tasks.iter().map(|(kind, _)| kind.clone()).collect()
    }

    pub fn stats(&self) -> Arc<WatchStats> {
        self.stats.clone()
    }

    /// Stop all tasks and wait for them. A capture already running finishes
    /// first.
    pub async fn shutdown(self) {
        self.token.cancel();
        for (kind, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(kind = %kind, error = %e, "Watch task ended abnormally");
            }
        }
        info!("Watch coordinator stopped");
    }
}

struct KindWatch {
    kind: ResourceKind,
    provider: Arc<dyn ResourceProvider>,
    gate: Arc<DebounceGate>,
    restart_backoff: Duration,
    token: CancellationToken,
    stats: Arc<WatchStats>,
}

impl KindWatch {
    async fn run(self) {
        let source = format!("watch:{}", self.kind);

        while !self.token.is_cancelled() {
            let subscribed = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                result = self.provider.subscribe(&self.kind) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    self.stats.update(&self.kind, |s| s.subscriptions += 1);
                    debug!(kind = %self.kind, "Subscribed to changes");

                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = self.token.cancelled() => return,
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(event)) => {
                                self.stats.update(&self.kind, |s| s.events += 1);
                                debug!(kind = %self.kind, change = ?event.change, "Change event");
                                self.forward(&source).await;
                            }
                            Some(Err(e)) => {
                                warn!(kind = %self.kind, error = %e, "Change stream failed");
                                break;
                            }
                            None => {
                                info!(kind = %self.kind, "Change stream closed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(kind = %self.kind, error = %e, "Failed to subscribe");
                }
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.restart_backoff) => {}
            }
        }
        debug!(kind = %self.kind, "Watch task stopped");
    }

    async fn forward(&self, source: &str) {
        match self.gate.request_capture(source).await {
            Ok(outcome) if outcome.created() => {
                self.stats.update(&self.kind, |s| s.versions_created += 1);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "Capture failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResourceProvider;
    use crate::resource::ChangeType;
    use crate::snapshot::SnapshotEngine;
    use clusterback_store::{MemoryVersionStore, VersionStore};
    use serde_json::json;

    struct Fixture {
        provider: Arc<MockResourceProvider>,
        store: Arc<MemoryVersionStore>,
        coordinator: WatchCoordinator,
    }

    fn fixture(min_interval: Duration) -> Fixture {
        let provider = Arc::new(MockResourceProvider::new());
        provider.set_objects(
            "pods",
            vec![json!({"kind": "Pod", "metadata": {"name": "a", "namespace": "default"}})],
        );
        let store = Arc::new(MemoryVersionStore::new());
        let kinds = vec![ResourceKind::from("pods"), ResourceKind::from("services")];
        let engine = Arc::new(SnapshotEngine::new(provider.clone(), store.clone(), kinds));
        let gate = Arc::new(DebounceGate::new(engine, min_interval));
        let coordinator = WatchCoordinator::new(provider.clone(), gate)
            .with_restart_backoff(Duration::from_secs(5));
        Fixture {
            provider,
            store,
            coordinator,
        }
    }

    fn kinds() -> Vec<ResourceKind> {
        vec![ResourceKind::from("pods"), ResourceKind::from("services")]
    }

    /// Let spawned tasks run until they block.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_subscription_per_kind() {
        let f = fixture(Duration::from_secs(60));
        let handle = f.coordinator.start(kinds());
        settle().await;

        assert_eq!(f.provider.subscriptions("pods"), 1);
        assert_eq!(f.provider.subscriptions("services"), 1);
        assert_eq!(handle.kinds().len(), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_storm_creates_one_version() {
        let f = fixture(Duration::from_secs(60));
        let handle = f.coordinator.start(kinds());
        settle().await;

        for _ in 0..50 {
            f.provider.emit("pods", ChangeType::Modified);
            f.provider.emit("services", ChangeType::Added);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let stats = handle.stats();
        assert_eq!(stats.kind(&ResourceKind::from("pods")).events, 50);
        assert_eq!(stats.kind(&ResourceKind::from("services")).events, 50);
        assert_eq!(f.store.len().await.unwrap(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_is_resubscribed_after_backoff() {
        let f = fixture(Duration::from_secs(60));
        let handle = f.coordinator.start(kinds());
        settle().await;

        f.provider.close_streams("pods");
        settle().await;
        assert_eq!(f.provider.subscriptions("pods"), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.provider.subscriptions("pods"), 2);
        // The other kind is unaffected.
        assert_eq!(f.provider.subscriptions("services"), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_and_subscribe_failure_are_retried() {
        let f = fixture(Duration::from_secs(60));
        f.provider.fail_subscribe("services", "forbidden");
        let handle = f.coordinator.start(kinds());
        settle().await;
        assert_eq!(f.provider.subscriptions("services"), 0);

        f.provider.emit_error("pods", "connection reset");
        f.provider.clear_failures();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(f.provider.subscriptions("pods"), 2);
        assert_eq!(f.provider.subscriptions("services"), 1);

        // Events still flow after the restart.
        f.provider.emit("services", ChangeType::Deleted);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.store.len().await.unwrap(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_captures_every_change() {
        let f = fixture(Duration::from_secs(0));
        f.provider.set_objects("pods", vec![json!({"kind": "Pod", "metadata": {"name": "x"}})]);
        let handle = f.coordinator.start(vec![ResourceKind::from("pods")]);
        settle().await;

        f.provider.emit("pods", ChangeType::Added);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.store.len().await.unwrap(), 1);

        f.provider.set_objects(
            "pods",
            vec![json!({"kind": "Pod", "metadata": {"name": "y"}})],
        );
        f.provider.emit("pods", ChangeType::Modified);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.store.len().await.unwrap(), 2);
        assert_eq!(
            handle.stats().kind(&ResourceKind::from("pods")).versions_created,
            2
        );
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_capture() {
        let f = fixture(Duration::from_secs(60));
        f.provider.set_list_delay(Duration::from_secs(2));
        let handle = f.coordinator.start(vec![ResourceKind::from("pods")]);
        settle().await;

        f.provider.emit("pods", ChangeType::Added);
        settle().await;
        handle.shutdown().await;

        assert_eq!(f.store.len().await.unwrap(), 1);
        assert_eq!(f.provider.emit("pods", ChangeType::Added), 0);
    }
}
