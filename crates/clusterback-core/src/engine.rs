//! The engine facade wires the components around one shared gate.

use crate::applier::Applier;
use crate::config::Config;
use crate::debounce::{DebounceGate, GateOutcome, DEFAULT_MIN_INTERVAL};
use crate::diff::{DiffEngine, DiffOutcome};
use crate::error::{CoreError, CoreResult};
use crate::provider::ResourceProvider;
use crate::resource::ResourceKind;
use crate::rollback::{RollbackEngine, RollbackOutcome};
use crate::snapshot::{CaptureReport, SnapshotEngine};
use crate::watch::{WatchCoordinator, WatchHandle, DEFAULT_RESTART_BACKOFF};
use clusterback_store::{Version, VersionId, VersionStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub kinds: Vec<ResourceKind>,
    pub min_interval: Duration,
    pub restart_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            kinds: ResourceKind::defaults(),
            min_interval: DEFAULT_MIN_INTERVAL,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            kinds: config.kinds(),
            min_interval: config.min_interval(),
            restart_backoff: config.restart_backoff(),
        }
    }
}

/// Entry point for every trigger: CLI, HTTP and watch tasks.
///
/// All captures go through the same [`DebounceGate`].
pub struct Engine {
    store: Arc<dyn VersionStore>,
    gate: Arc<DebounceGate>,
    diff: DiffEngine,
    rollback: RollbackEngine,
    watch: WatchCoordinator,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        store: Arc<dyn VersionStore>,
        applier: Arc<dyn Applier>,
        options: EngineOptions,
    ) -> Self {
        let snapshot = Arc::new(SnapshotEngine::new(
            provider.clone(),
            store.clone(),
            options.kinds.clone(),
        ));
        let gate = Arc::new(DebounceGate::new(snapshot, options.min_interval));
        let diff = DiffEngine::new(provider.clone(), store.clone(), options.kinds.clone());
        let rollback = RollbackEngine::new(store.clone(), applier);
        let watch = WatchCoordinator::new(provider, gate.clone())
            .with_restart_backoff(options.restart_backoff);

        Self {
            store,
            gate,
            diff,
            rollback,
            watch,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn gate(&self) -> Arc<DebounceGate> {
        self.gate.clone()
    }

    /// Capture now, ignoring the minimum interval.
    pub async fn capture(&self) -> CoreResult<CaptureReport> {
        self.gate.force_capture("on-demand").await
    }

    /// Capture unless a version was created within the minimum interval.
    pub async fn request_capture(&self, source: &str) -> CoreResult<GateOutcome> {
        self.gate.request_capture(source).await
    }

    pub async fn diff(&self, version_id: &VersionId) -> CoreResult<DiffOutcome> {
        self.diff.diff(version_id).await
    }

    pub async fn rollback(&self, version_id: &VersionId) -> CoreResult<RollbackOutcome> {
        self.rollback.rollback(version_id).await
    }

    pub async fn checkout(&self, version_id: &VersionId) -> CoreResult<PathBuf> {
        self.rollback.checkout(version_id).await
    }

    /// All versions, oldest first.
    pub async fn list_versions(&self) -> CoreResult<Vec<Version>> {
        self.store
            .list()
            .await
            .map_err(|e| CoreError::store("list versions", None, e))
    }

    /// Start watching every configured kind.
    pub fn watch(&self) -> WatchHandle {
        self.watch.start(self.options.kinds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResourceProvider, RecordingApplier};
    use crate::resource::ChangeType;
    use crate::snapshot::CaptureOutcome;
    use clusterback_store::{GitVersionStore, MemoryVersionStore};
    use serde_json::json;

    fn deployment(replicas: u32) -> serde_json::Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"replicas": replicas}
        })
    }

    fn options() -> EngineOptions {
        EngineOptions {
            kinds: vec![ResourceKind::from("deployments")],
            ..Default::default()
        }
    }

    #[test]
    fn test_options_from_config() {
        let config = Config {
            kinds: Some(vec!["pods".to_string()]),
            min_interval_secs: Some(5),
            ..Default::default()
        };
        let options = EngineOptions::from(&config);
        assert_eq!(options.kinds, vec![ResourceKind::from("pods")]);
        assert_eq!(options.min_interval, Duration::from_secs(5));
        assert_eq!(options.restart_backoff, DEFAULT_RESTART_BACKOFF);
    }

    #[tokio::test]
    async fn test_capture_diff_rollback_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockResourceProvider::new());
        let store = Arc::new(GitVersionStore::open(dir.path()).await.unwrap());
        let applier = Arc::new(RecordingApplier::new());
        let engine = Engine::new(provider.clone(), store, applier.clone(), options());

        provider.set_objects("deployments", vec![deployment(2)]);
        let v1 = engine.capture().await.unwrap().outcome.version_id().clone();

        provider.set_objects("deployments", vec![deployment(5)]);
        let v2 = engine.capture().await.unwrap();
        assert!(v2.outcome.is_created());
        assert_eq!(engine.list_versions().await.unwrap().len(), 2);

        let DiffOutcome::Changed(report) = engine.diff(&v1).await.unwrap() else {
            panic!("expected differences against v1");
        };
        assert!(report.unified.contains("-  replicas: 5"));
        assert!(report.unified.contains("+  replicas: 2"));

        let outcome = engine.rollback(&v1).await.unwrap();
        assert_eq!(outcome.version.id, v1);
        let stored = std::fs::read(engine.checkout(&v1).await.unwrap()).unwrap();
        assert_eq!(applier.calls(), vec![stored]);

        // Once live state matches v1 again, the diff is empty.
        provider.set_objects("deployments", vec![deployment(2)]);
        assert!(matches!(
            engine.diff(&v1).await.unwrap(),
            DiffOutcome::Identical { .. }
        ));
    }

    #[tokio::test]
    async fn test_request_capture_is_rate_limited() {
        let provider = Arc::new(MockResourceProvider::new());
        provider.set_objects("deployments", vec![deployment(1)]);
        let engine = Engine::new(
            provider.clone(),
            Arc::new(MemoryVersionStore::new()),
            Arc::new(RecordingApplier::new()),
            options(),
        );

        assert!(engine.request_capture("test").await.unwrap().created());
        provider.set_objects("deployments", vec![deployment(2)]);
        let outcome = engine.request_capture("test").await.unwrap();
        assert!(matches!(outcome, GateOutcome::RateLimited { .. }));
        assert!(outcome.reason().unwrap().contains("minimum interval 60s"));

        // On-demand capture still goes through.
        let report = engine.capture().await.unwrap();
        assert!(matches!(report.outcome, CaptureOutcome::Created(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_feeds_the_shared_gate() {
        let provider = Arc::new(MockResourceProvider::new());
        provider.set_objects("deployments", vec![deployment(1)]);
        let store = Arc::new(MemoryVersionStore::new());
        let engine = Engine::new(
            provider.clone(),
            store.clone(),
            Arc::new(RecordingApplier::new()),
            options(),
        );

        let handle = engine.watch();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        provider.emit("deployments", ChangeType::Modified);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.len().await.unwrap(), 1);

        // The watch-created version rate-limits other triggers too.
        provider.set_objects("deployments", vec![deployment(3)]);
        assert!(!engine.request_capture("cli").await.unwrap().created());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_history() {
        let provider = Arc::new(MockResourceProvider::new());
        let store = Arc::new(MemoryVersionStore::new());
        let applier = Arc::new(RecordingApplier::new());
        let engine = Engine::new(
            provider.clone(),
            store.clone(),
            applier.clone(),
            EngineOptions {
                kinds: vec![ResourceKind::from("configmaps")],
                ..Default::default()
            },
        );
        let cm = |name: &str| json!({"kind": "ConfigMap", "metadata": {"name": name, "namespace": "default"}});

        assert!(engine.list_versions().await.unwrap().is_empty());
        provider.set_objects("configmaps", vec![cm("a"), cm("b")]);
        let CaptureOutcome::Created(v1) = engine.capture().await.unwrap().outcome else {
            panic!("expected V1");
        };

        provider.set_objects("configmaps", vec![cm("a"), cm("b"), cm("c")]);
        let CaptureOutcome::Created(v2) = engine.capture().await.unwrap().outcome else {
            panic!("expected V2");
        };
        assert_eq!(v2.parent.as_ref(), Some(&v1.id));
        assert_ne!(
            store.get(&v1.id).await.unwrap(),
            store.get(&v2.id).await.unwrap()
        );

        let again = engine.capture().await.unwrap();
        assert_eq!(again.outcome, CaptureOutcome::NoChange { latest: v2.id.clone() });
        assert_eq!(engine.list_versions().await.unwrap().len(), 2);

        let DiffOutcome::Changed(report) = engine.diff(&v1.id).await.unwrap() else {
            panic!("expected differences against V1");
        };
        assert_eq!(report.resources.len(), 1);
        assert_eq!(report.resources[0].identity.name, "c");
        assert_eq!(report.resources[0].change, crate::diff::ChangeKind::Added);

        let outcome = engine.rollback(&v1.id).await.unwrap();
        assert_eq!(outcome.report.applied.len(), 2);
        assert_eq!(applier.calls(), vec![store.get(&v1.id).await.unwrap()]);
    }
}
