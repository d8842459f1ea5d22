//! Snapshot engine: capture live state, skip duplicates, append new versions.

use crate::error::{CoreError, CoreResult};
use crate::payload;
use crate::provider::ResourceProvider;
use crate::resource::{ResourceDocument, ResourceKind};
use chrono::Utc;
use clusterback_store::{Version, VersionId, VersionStore};
use clusterback_util::TimingGuard;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a single capture.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// A new version was appended.
    Created(Version),
    /// Live state matches the latest version; nothing was written.
    NoChange { latest: VersionId },
}

impl CaptureOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CaptureOutcome::Created(_))
    }

    /// Id of the version that now describes live state.
    pub fn version_id(&self) -> &VersionId {
        match self {
            CaptureOutcome::Created(version) => &version.id,
            CaptureOutcome::NoChange { latest } => latest,
        }
    }
}

/// What a capture saw along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    /// Number of documents in the snapshot.
    pub documents: usize,
    /// Kinds whose listing failed and contributed nothing.
    pub skipped_kinds: Vec<ResourceKind>,
}

/// A capture outcome with its summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub outcome: CaptureOutcome,
    pub summary: CaptureSummary,
}

/// How to treat a kind whose listing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListPolicy {
    /// Log and skip the kind.
    Partial,
    /// Fail the whole listing.
    Strict,
}

/// List every configured kind.
pub(crate) async fn list_live(
    provider: &dyn ResourceProvider,
    kinds: &[ResourceKind],
    policy: ListPolicy,
    operation: &'static str,
) -> CoreResult<(Vec<ResourceDocument>, Vec<ResourceKind>)> {
    let mut documents = Vec::new();
    let mut skipped = Vec::new();

    for kind in kinds {
        match provider.list(kind).await {
            Ok(mut listed) => {
                debug!(kind = %kind, count = listed.len(), "Listed resources");
                documents.append(&mut listed);
            }
            Err(e) if policy == ListPolicy::Partial => {
                warn!(kind = %kind, error = %e, "Failed to list kind, skipping it");
                skipped.push(kind.clone());
            }
            Err(e) => return Err(CoreError::Provider { operation, source: e }),
        }
    }

    Ok((documents, skipped))
}

/// Builds versions from live state.
///
/// Capture is not internally serialized; run it through a
/// [`DebounceGate`](crate::DebounceGate) when requests can overlap.
pub struct SnapshotEngine {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn VersionStore>,
    kinds: Vec<ResourceKind>,
}

impl SnapshotEngine {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        store: Arc<dyn VersionStore>,
        kinds: Vec<ResourceKind>,
    ) -> Self {
        Self {
            provider,
            store,
            kinds,
        }
    }

    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    /// Capture live state and append it if it differs from the latest version.
    pub async fn capture(&self) -> CoreResult<CaptureReport> {
        let _timing = TimingGuard::engine("capture");

        let (documents, skipped_kinds) =
            list_live(self.provider.as_ref(), &self.kinds, ListPolicy::Partial, "capture").await?;
        let summary = CaptureSummary {
            documents: documents.len(),
            skipped_kinds,
        };

        let encoded = payload::encode(&documents).map_err(|e| CoreError::Payload {
            operation: "capture",
            source: e,
        })?;

        let latest = self
            .store
            .latest()
            .await
            .map_err(|e| CoreError::store("capture", None, e))?;

        if let Some(latest) = &latest {
            let previous = self
                .store
                .get(&latest.id)
                .await
                .map_err(|e| CoreError::store("capture", None, e))?;
            if previous == encoded {
                debug!(latest = %latest.id, "Live state unchanged, no version created");
                return Ok(CaptureReport {
                    outcome: CaptureOutcome::NoChange {
                        latest: latest.id.clone(),
                    },
                    summary,
                });
            }
        }

        let label = snapshot_label();
        let id = self
            .store
            .append(&encoded, &label)
            .await
            .map_err(|e| CoreError::store("capture", None, e))?;
        let version = self
            .store
            .version(&id)
            .await
            .map_err(|e| CoreError::store("capture", None, e))?;

        info!(
            version = %version.id,
            documents = summary.documents,
            skipped = summary.skipped_kinds.len(),
            "Created version"
        );

        Ok(CaptureReport {
            outcome: CaptureOutcome::Created(version),
            summary,
        })
    }
}

/// Label for a new version, e.g. `Snapshot 20240101_120000`.
pub fn snapshot_label() -> String {
    format!("Snapshot {}", Utc::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResourceProvider;
    use clusterback_store::MemoryVersionStore;
    use serde_json::json;

    fn kinds() -> Vec<ResourceKind> {
        vec![ResourceKind::from("configmaps"), ResourceKind::from("deployments")]
    }

    fn setup() -> (Arc<MockResourceProvider>, Arc<MemoryVersionStore>, SnapshotEngine) {
        let provider = Arc::new(MockResourceProvider::new());
        provider.set_objects(
            "configmaps",
            vec![json!({"kind": "ConfigMap", "metadata": {"name": "settings", "namespace": "default"}})],
        );
        provider.set_objects(
            "deployments",
            vec![json!({"kind": "Deployment", "metadata": {"name": "web", "namespace": "default"}, "spec": {"replicas": 2}})],
        );
        let store = Arc::new(MemoryVersionStore::new());
        let engine = SnapshotEngine::new(provider.clone(), store.clone(), kinds());
        (provider, store, engine)
    }

    #[tokio::test]
    async fn test_first_capture_creates_version() {
        let (_provider, store, engine) = setup();
        let report = engine.capture().await.unwrap();
        assert!(report.outcome.is_created());
        assert_eq!(report.summary.documents, 2);
        assert!(report.summary.skipped_kinds.is_empty());
        assert_eq!(store.len().await.unwrap(), 1);

        let CaptureOutcome::Created(version) = report.outcome else {
            panic!("expected a new version");
        };
        assert!(version.label.starts_with("Snapshot "));
        assert_eq!(version.parent, None);
    }

    #[tokio::test]
    async fn test_unchanged_state_is_not_stored_twice() {
        let (_provider, store, engine) = setup();
        let first = engine.capture().await.unwrap();
        let second = engine.capture().await.unwrap();

        assert_eq!(
            second.outcome,
            CaptureOutcome::NoChange {
                latest: first.outcome.version_id().clone()
            }
        );
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reordered_listing_is_not_a_change() {
        let (provider, store, engine) = setup();
        provider.set_objects(
            "configmaps",
            vec![
                json!({"kind": "ConfigMap", "metadata": {"name": "a", "namespace": "default"}}),
                json!({"kind": "ConfigMap", "metadata": {"name": "b", "namespace": "default"}}),
            ],
        );
        engine.capture().await.unwrap();
        provider.set_objects(
            "configmaps",
            vec![
                json!({"kind": "ConfigMap", "metadata": {"namespace": "default", "name": "b"}}),
                json!({"kind": "ConfigMap", "metadata": {"namespace": "default", "name": "a"}}),
            ],
        );
        let report = engine.capture().await.unwrap();
        assert!(!report.outcome.is_created());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_change_creates_child_version() {
        let (provider, store, engine) = setup();
        let first = engine.capture().await.unwrap();
        provider.set_objects(
            "deployments",
            vec![json!({"kind": "Deployment", "metadata": {"name": "web", "namespace": "default"}, "spec": {"replicas": 3}})],
        );
        let second = engine.capture().await.unwrap();

        let CaptureOutcome::Created(version) = second.outcome else {
            panic!("expected a new version");
        };
        assert_eq!(version.parent.as_ref(), Some(first.outcome.version_id()));
        let payload = String::from_utf8(store.get(&version.id).await.unwrap()).unwrap();
        assert!(payload.contains("replicas: 3"));
    }

    #[tokio::test]
    async fn test_failing_kind_is_skipped() {
        let (provider, store, engine) = setup();
        provider.fail_list("deployments", "forbidden");

        let report = engine.capture().await.unwrap();
        assert!(report.outcome.is_created());
        assert_eq!(report.summary.documents, 1);
        assert_eq!(report.summary.skipped_kinds, vec![ResourceKind::from("deployments")]);

        let payload = String::from_utf8(
            store.get(report.outcome.version_id()).await.unwrap(),
        )
        .unwrap();
        assert!(payload.contains("ConfigMap"));
        assert!(!payload.contains("Deployment"));
    }

    #[tokio::test]
    async fn test_empty_cluster_still_creates_first_version() {
        let provider = Arc::new(MockResourceProvider::new());
        let store = Arc::new(MemoryVersionStore::new());
        let engine = SnapshotEngine::new(provider, store.clone(), kinds());

        let report = engine.capture().await.unwrap();
        assert!(report.outcome.is_created());
        assert_eq!(store.get(report.outcome.version_id()).await.unwrap(), b"");
        assert!(!engine.capture().await.unwrap().outcome.is_created());
    }

    #[test]
    fn test_snapshot_label_format() {
        let label = snapshot_label();
        let stamp = label.strip_prefix("Snapshot ").unwrap();
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
    }
}
