//! Applier capability.

use crate::error::ApplierResult;
use crate::resource::ResourceRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Documents an applier created or updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<ResourceRef>,
}

/// Writes a stored payload back onto the live cluster.
///
/// Each document is created or updated. Resources absent from the payload
/// are left alone. On failure nothing already applied is undone; the error
/// lists what went through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, payload: &[u8]) -> ApplierResult<ApplyReport>;
}
