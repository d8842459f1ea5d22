//! Rollback engine: replay a stored version onto the live cluster.
//!
//! A rollback is forward-apply only. Every document in the version is
//! created or updated; resources created after the version stay in place.

use crate::applier::{Applier, ApplyReport};
use crate::error::{CoreError, CoreResult};
use clusterback_store::{Version, VersionId, VersionStore};
use clusterback_util::{Identifier, TimingGuard};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Rollback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackState {
    Idle,
    Fetching,
    Applying,
    Succeeded,
    Failed,
}

impl RollbackState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: RollbackState) -> bool {
        use RollbackState::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Fetching, Applying)
                | (Fetching, Failed)
                | (Applying, Succeeded)
                | (Applying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RollbackState::Succeeded | RollbackState::Failed)
    }
}

/// One rollback run's progress through the state machine.
#[derive(Debug, Clone)]
struct RollbackRun {
    id: String,
    version_id: VersionId,
    transitions: Vec<RollbackState>,
}

impl RollbackRun {
    fn new(version_id: &VersionId) -> Self {
        Self {
            id: Identifier::rollback(),
            version_id: version_id.clone(),
            transitions: vec![RollbackState::Idle],
        }
    }

    fn state(&self) -> RollbackState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(RollbackState::Idle)
    }

    fn advance(&mut self, next: RollbackState) {
        let current = self.state();
        if current.can_transition_to(next) {
            self.transitions.push(next);
        } else {
            warn!(
                run = %self.id,
                from = ?current,
                to = ?next,
                "Ignoring illegal rollback transition"
            );
        }
    }
}

/// Result of a successful rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub run_id: String,
    pub version: Version,
    pub report: ApplyReport,
    /// States visited, starting at `Idle`.
    pub transitions: Vec<RollbackState>,
}

/// Replays stored versions.
pub struct RollbackEngine {
    store: Arc<dyn VersionStore>,
    applier: Arc<dyn Applier>,
}

impl RollbackEngine {
    pub fn new(store: Arc<dyn VersionStore>, applier: Arc<dyn Applier>) -> Self {
        Self { store, applier }
    }

    /// Apply `version_id` to the live cluster.
    ///
    /// The applier is called exactly once with the stored bytes, and never
    /// for an unknown version.
    pub async fn rollback(&self, version_id: &VersionId) -> CoreResult<RollbackOutcome> {
        let _timing = TimingGuard::engine("rollback");
        let mut run = RollbackRun::new(version_id);

        run.advance(RollbackState::Fetching);
        let fetched = self.fetch(version_id).await;
        let (version, payload) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                run.advance(RollbackState::Failed);
                warn!(run = %run.id, version = %run.version_id, error = %e, "Rollback failed");
                return Err(e);
            }
        };

        run.advance(RollbackState::Applying);
        info!(
            run = %run.id,
            version = %version.id,
            bytes = payload.len(),
            "Applying stored version"
        );

        match self.applier.apply(&payload).await {
            Ok(report) => {
                run.advance(RollbackState::Succeeded);
                info!(
                    run = %run.id,
                    version = %version.id,
                    applied = report.applied.len(),
                    "Rollback succeeded"
                );
                Ok(RollbackOutcome {
                    run_id: run.id,
                    version,
                    report,
                    transitions: run.transitions,
                })
            }
            Err(e) => {
                run.advance(RollbackState::Failed);
                warn!(run = %run.id, version = %version.id, error = %e, "Rollback failed");
                Err(CoreError::Applier {
                    version_id: version.id,
                    source: e,
                })
            }
        }
    }

    /// Materialize a version's payload on disk.
    pub async fn checkout(&self, version_id: &VersionId) -> CoreResult<PathBuf> {
        self.store
            .checkout(version_id)
            .await
            .map_err(|e| CoreError::store("checkout", Some(version_id), e))
    }

    async fn fetch(&self, version_id: &VersionId) -> CoreResult<(Version, Vec<u8>)> {
        let version = self
            .store
            .version(version_id)
            .await
            .map_err(|e| CoreError::store("rollback", Some(version_id), e))?;
        let payload = self
            .store
            .get(&version.id)
            .await
            .map_err(|e| CoreError::store("rollback", Some(version_id), e))?;
        Ok((version, payload))
    }
}
