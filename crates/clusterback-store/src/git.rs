//! Git-backed version store.
//!
//! Every version is a commit on `HEAD` whose tree holds a single
//! [`PAYLOAD_FILE`]. The commit hash is the version id, the commit message is
//! the label and the first parent is the previous version, so the history is
//! a plain linear chain that any git tooling can inspect.
//!
//! ```text
//! store_dir/
//!   .git/                       # one commit per version
//!   checkouts/
//!     <version_id>/
//!       resources.yaml          # materialized by `checkout`
//! ```
//!
//! Commits are written straight from blobs and tree builders; the working
//! tree is never touched, so checkouts cannot leak into later versions.

use crate::{StoreError, StoreResult, Version, VersionId, VersionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::{Commit, ErrorCode, Oid, Repository, Signature, Sort};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// File name of the payload inside every version commit.
pub const PAYLOAD_FILE: &str = "resources.yaml";

/// Identity recorded on version commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "clusterback".to_string(),
            email: "clusterback@localhost".to_string(),
        }
    }
}

/// Version store backed by a git repository.
pub struct GitVersionStore {
    dir: PathBuf,
    author: CommitAuthor,
    /// Serializes appends so HEAD is never read and moved concurrently.
    write_lock: Mutex<()>,
}

impl GitVersionStore {
    /// Open the store at `dir`, initializing a repository if there is none.
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let init_dir = dir.clone();
        run_blocking(move || {
            match Repository::open(&init_dir) {
                Ok(_) => debug!(path = %init_dir.display(), "Opened version repository"),
                Err(e) if e.code() == ErrorCode::NotFound => {
                    Repository::init(&init_dir)?;
                    info!(path = %init_dir.display(), "Initialized version repository");
                }
                Err(e) => return Err(e.into()),
            }
            Ok(())
        })
        .await?;

        Ok(Self {
            dir,
            author: CommitAuthor::default(),
            write_lock: Mutex::new(()),
        })
    }

    /// Record commits under the given author.
    pub fn with_author(mut self, author: CommitAuthor) -> Self {
        self.author = author;
        self
    }

    /// Directory holding the repository.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Run `f` against a freshly opened repository on the blocking pool.
    ///
    /// `Repository` is not `Sync`, so each operation opens its own handle.
    async fn with_repo<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Repository) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let dir = self.dir.clone();
        run_blocking(move || {
            let repo = Repository::open(&dir)?;
            f(&repo)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::operation_failed(format!("git task failed: {e}")))?
}

/// The commit HEAD points at, or `None` for a repository without versions.
fn head_commit(repo: &Repository) -> StoreResult<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve a full or abbreviated commit hash.
fn resolve<'r>(repo: &'r Repository, id: &str) -> StoreResult<Commit<'r>> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StoreError::not_found(id));
    }
    let object = repo
        .revparse_single(id)
        .map_err(|_| StoreError::not_found(id))?;
    object
        .peel_to_commit()
        .map_err(|_| StoreError::not_found(id))
}

fn to_version(commit: &Commit<'_>) -> Version {
    Version {
        id: VersionId::from_string(commit.id().to_string()),
        label: commit.message().unwrap_or("").trim().to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        parent: commit
            .parent_id(0)
            .ok()
            .map(|oid| VersionId::from_string(oid.to_string())),
    }
}

fn read_payload(repo: &Repository, commit: &Commit<'_>) -> StoreResult<Vec<u8>> {
    let tree = commit.tree()?;
    let entry = tree.get_path(Path::new(crate::PAYLOAD_FILE)).map_err(|_| {
        StoreError::Corrupted(format!("commit {} has no {}", commit.id(), PAYLOAD_FILE))
    })?;
    let blob = entry.to_object(repo)?.peel_to_blob()?;
    Ok(blob.content().to_vec())
}

#[async_trait]
impl VersionStore for GitVersionStore {
    async fn append(&self, payload: &[u8], label: &str) -> StoreResult<VersionId> {
        let _guard = self.write_lock.lock().await;

        let payload = payload.to_vec();
        let label = label.to_string();
        let author = self.author.clone();

        let oid: Oid = self
            .with_repo(move |repo| {
                let sig = Signature::now(&author.name, &author.email)?;
                let blob = repo.blob(&payload)?;

                let mut builder = repo.treebuilder(None)?;
                builder.insert(PAYLOAD_FILE, blob, 0o100644)?;
                let tree = repo.find_tree(builder.write()?)?;

                let parent = head_commit(repo)?;
                let parents: Vec<&Commit<'_>> = parent.iter().collect();

                Ok(repo.commit(Some("HEAD"), &sig, &sig, &label, &tree, &parents)?)
            })
            .await?;

        info!(version = %oid, "Committed version");
        Ok(VersionId::from_string(oid.to_string()))
    }

    async fn latest(&self) -> StoreResult<Option<Version>> {
        self.with_repo(|repo| Ok(head_commit(repo)?.as_ref().map(to_version)))
            .await
    }

    async fn list(&self) -> StoreResult<Vec<Version>> {
        self.with_repo(|repo| {
            if head_commit(repo)?.is_none() {
                return Ok(Vec::new());
            }

            let mut revwalk = repo.revwalk()?;
            revwalk.push_head()?;
            revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

            let mut versions = Vec::new();
            for oid in revwalk {
                let commit = repo.find_commit(oid?)?;
                versions.push(to_version(&commit));
            }
            Ok(versions)
        })
        .await
    }

    async fn version(&self, id: &VersionId) -> StoreResult<Version> {
        let id = id.as_str().to_string();
        self.with_repo(move |repo| Ok(to_version(&resolve(repo, &id)?)))
            .await
    }

    async fn get(&self, id: &VersionId) -> StoreResult<Vec<u8>> {
        let id = id.as_str().to_string();
        self.with_repo(move |repo| {
            let commit = resolve(repo, &id)?;
            read_payload(repo, &commit)
        })
        .await
    }

    async fn checkout(&self, id: &VersionId) -> StoreResult<PathBuf> {
        let version = self.version(id).await?;
        let payload = self.get(&version.id).await?;

        let dir = self.dir.join("checkouts").join(version.id.as_str());
        fs::create_dir_all(&dir).await?;
        let path = dir.join(PAYLOAD_FILE);
        fs::write(&path, payload).await?;

        debug!(version = %version.id, path = %path.display(), "Checked out version");
        Ok(path)
    }
}
