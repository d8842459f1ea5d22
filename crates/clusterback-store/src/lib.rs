//! Version stores for clusterback.
//!
//! A version store is an append-only, linear log of immutable payloads. Each
//! appended payload becomes a [`Version`] whose parent is the previous head.
//! Two backends are provided:
//! - [`GitVersionStore`]: one commit per version in a git repository (default)
//! - [`MemoryVersionStore`]: in-process log (for testing and dry runs)
//!
//! # Example
//!
//! ```no_run
//! use clusterback_store::{GitVersionStore, VersionStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = GitVersionStore::open("/var/lib/clusterback/snapshots").await?;
//! let id = store.append(b"kind: ConfigMap\n", "Snapshot 20240101_120000").await?;
//! assert_eq!(store.get(&id).await?, b"kind: ConfigMap\n");
//! # Ok(())
//! # }
//! ```

mod error;
mod git;
mod memory;
mod version;

pub use error::{StoreError, StoreResult};
pub use git::{CommitAuthor, GitVersionStore, PAYLOAD_FILE};
pub use memory::MemoryVersionStore;
pub use version::{Version, VersionId};

use async_trait::async_trait;
use std::path::PathBuf;

/// An append-only log of immutable versions.
///
/// Implementations only need to be safe under a single writer; callers
/// serialize appends. Reads may run concurrently with an append.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Append a payload as a new version on top of the current head.
    async fn append(&self, payload: &[u8], label: &str) -> StoreResult<VersionId>;

    /// The most recent version, if any.
    async fn latest(&self) -> StoreResult<Option<Version>>;

    /// All versions, oldest first.
    async fn list(&self) -> StoreResult<Vec<Version>>;

    /// Look up a single version's metadata.
    ///
    /// Fails with [`StoreError::NotFound`] for unknown ids.
    async fn version(&self, id: &VersionId) -> StoreResult<Version>;

    /// Payload bytes of a version.
    ///
    /// Fails with [`StoreError::NotFound`] for unknown ids.
    async fn get(&self, id: &VersionId) -> StoreResult<Vec<u8>>;

    /// Materialize a version's payload to a file and return its path.
    async fn checkout(&self, id: &VersionId) -> StoreResult<PathBuf>;

    /// Number of stored versions.
    async fn len(&self) -> StoreResult<usize> {
        Ok(self.list().await?.len())
    }

    /// Whether the store holds no versions.
    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.latest().await?.is_none())
    }
}
