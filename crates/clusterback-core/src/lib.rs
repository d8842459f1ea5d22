//! Core engines for clusterback.
//!
//! clusterback keeps a linear history of cluster states. This crate holds
//! the parts that decide when to capture, how to compare and how to revert:
//!
//! - [`SnapshotEngine`]: list live resources, encode them deterministically
//!   and append a version only when the state changed
//! - [`DebounceGate`]: the single, rate-limited admission point for captures
//! - [`WatchCoordinator`]: one change subscription per resource kind, feeding
//!   the gate
//! - [`DiffEngine`]: stored version against fresh live state
//! - [`RollbackEngine`]: replay a stored version through an [`Applier`]
//!
//! Cluster access and persistence sit behind the [`ResourceProvider`],
//! [`Applier`] and [`VersionStore`](clusterback_store::VersionStore) traits.
//! [`Engine`] wires everything around one shared gate.

pub mod applier;
pub mod config;
pub mod debounce;
pub mod diff;
pub mod engine;
pub mod error;
pub mod mock;
pub mod payload;
pub mod provider;
pub mod resource;
pub mod rollback;
pub mod snapshot;
pub mod watch;

pub use applier::{Applier, ApplyReport};
pub use config::Config;
pub use debounce::{DebounceGate, GateOutcome};
pub use diff::{ChangeKind, DiffEngine, DiffOutcome, DiffReport, ResourceChange};
pub use engine::{Engine, EngineOptions};
pub use error::{
    ApplierError, ApplierResult, ConfigError, CoreError, CoreResult, PayloadError, ProviderError,
    ProviderResult,
};
pub use provider::{ChangeStream, ResourceProvider};
pub use resource::{ChangeEvent, ChangeType, ResourceDocument, ResourceKind, ResourceRef};
pub use rollback::{RollbackEngine, RollbackOutcome, RollbackState};
pub use snapshot::{CaptureOutcome, CaptureReport, CaptureSummary, SnapshotEngine};
pub use watch::{WatchCoordinator, WatchHandle, WatchStats};
