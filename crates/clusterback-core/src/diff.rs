//! Diff engine: compare a stored version against live state.
//!
//! The unified diff reads from live state (`--- live`) to the stored version
//! (`+++ <id>`), so `+` lines are what a rollback would bring back. The
//! structural summary is relative to the version: `Added` resources exist
//! only live, `Removed` ones only in the version.

use crate::error::{CoreError, CoreResult};
use crate::payload::{self, RenderedDocument};
use crate::provider::ResourceProvider;
use crate::resource::{ResourceKind, ResourceRef};
use crate::snapshot::{list_live, ListPolicy};
use clusterback_store::{VersionId, VersionStore};
use clusterback_util::TimingGuard;
use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Message returned when live state matches the version.
pub const NO_DIFFERENCES: &str = "No differences";

/// Lines of context around each hunk.
const CONTEXT_LINES: usize = 3;

/// Result of a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiffOutcome {
    Identical { message: String },
    Changed(DiffReport),
}

/// How a resource differs between the version and live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Live only; created after the version.
    Added,
    /// Version only; deleted since.
    Removed,
    /// Present in both with different bodies.
    Modified,
}

/// One resource that differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    pub identity: ResourceRef,
    pub change: ChangeKind,
    /// Changed lines, prefixed with `-` (live) or `+` (version).
    pub lines: Vec<String>,
}

/// Full diff between live state and a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub version_id: VersionId,
    pub unified: String,
    pub resources: Vec<ResourceChange>,
}

impl DiffReport {
    pub fn count(&self, change: ChangeKind) -> usize {
        self.resources.iter().filter(|r| r.change == change).count()
    }
}

/// Computes diffs on demand. Never writes.
pub struct DiffEngine {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<dyn VersionStore>,
    kinds: Vec<ResourceKind>,
}

impl DiffEngine {
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

    /// Diff live state against `version_id`.
    ///
    /// Any listing failure fails the diff; a partial live view would report
    /// resources as removed that are merely unreadable.
    pub async fn diff(&self, version_id: &VersionId) -> CoreResult<DiffOutcome> {
        let _timing = TimingGuard::engine("diff");

        let version = self
            .store
            .version(version_id)
            .await
            .map_err(|e| CoreError::store("diff", Some(version_id), e))?;
        let stored = self
            .store
            .get(&version.id)
            .await
            .map_err(|e| CoreError::store("diff", Some(version_id), e))?;

        let (live_docs, _) =
            list_live(self.provider.as_ref(), &self.kinds, ListPolicy::Strict, "diff").await?;
        let live = payload::render(&live_docs).map_err(|e| CoreError::Payload {
            operation: "diff",
            source: e,
        })?;
        let live_text = payload::join(&live);

        if live_text.as_bytes() == stored.as_slice() {
            debug!(version = %version.id, "Live state matches version");
            return Ok(DiffOutcome::Identical {
                message: NO_DIFFERENCES.to_string(),
            });
        }

        let stored_docs = payload::decode(&stored)
            .and_then(|docs| payload::render(&docs))
            .map_err(|e| CoreError::Payload {
                operation: "diff",
                source: e,
            })?;
        let stored_text = String::from_utf8_lossy(&stored);

        let unified = unified_diff(&live_text, &stored_text, version.id.as_str());
        let resources = structural_diff(&live, &stored_docs);
        debug!(
            version = %version.id,
            changed = resources.len(),
            "Live state differs from version"
        );

        Ok(DiffOutcome::Changed(DiffReport {
            version_id: version.id,
            unified,
            resources,
        }))
    }
}

/// Unified line diff from live state to the stored payload.
fn unified_diff(live: &str, stored: &str, version_id: &str) -> String {
    let diff = TextDiff::from_lines(live, stored);
    let mut output = format!("--- live\n+++ {version_id}\n");

    for group in diff.grouped_ops(CONTEXT_LINES) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old = first.old_range().start..last.old_range().end;
        let new = first.new_range().start..last.new_range().end;
        output.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old.start + 1,
            old.len(),
            new.start + 1,
            new.len()
        ));

        for op in &group {
            for change in diff.iter_changes(op) {
                output.push(sign(change.tag()));
                output.push_str(change.value());
                if change.missing_newline() {
                    output.push('\n');
                }
            }
        }
    }

    output
}

/// Per-resource comparison of live and stored documents.
fn structural_diff(live: &[RenderedDocument], stored: &[RenderedDocument]) -> Vec<ResourceChange> {
    let live = by_identity(live);
    let stored = by_identity(stored);
    let mut changes = Vec::new();

    for (identity, live_text) in &live {
        match stored.get(identity) {
            None => changes.push(ResourceChange {
                identity: identity.clone(),
                change: ChangeKind::Added,
                lines: signed_lines('-', live_text),
            }),
            Some(stored_text) if stored_text != live_text => changes.push(ResourceChange {
                identity: identity.clone(),
                change: ChangeKind::Modified,
                lines: changed_lines(live_text, stored_text),
            }),
            Some(_) => {}
        }
    }

    for (identity, stored_text) in &stored {
        if !live.contains_key(identity) {
            changes.push(ResourceChange {
                identity: identity.clone(),
                change: ChangeKind::Removed,
                lines: signed_lines('+', stored_text),
            });
        }
    }

    changes.sort_by(|a, b| a.identity.cmp(&b.identity));
    changes
}

fn by_identity(docs: &[RenderedDocument]) -> BTreeMap<ResourceRef, String> {
    let mut map: BTreeMap<ResourceRef, String> = BTreeMap::new();
    for doc in docs {
        map.entry(doc.identity.clone())
            .or_default()
            .push_str(&doc.text);
    }
    map
}

fn signed_lines(prefix: char, text: &str) -> Vec<String> {
    text.lines().map(|line| format!("{prefix}{line}")).collect()
}

fn changed_lines(live: &str, stored: &str) -> Vec<String> {
    TextDiff::from_lines(live, stored)
        .iter_all_changes()
        .filter(|c| c.tag() != ChangeTag::Equal)
        .map(|c| format!("{}{}", sign(c.tag()), c.value().trim_end_matches('\n')))
        .collect()
}

fn sign(tag: ChangeTag) -> char {
    match tag {
        ChangeTag::Delete => '-',
        ChangeTag::Insert => '+',
        ChangeTag::Equal => ' ',
    }
}
