//! Resource provider capability.

use crate::error::ProviderResult;
use crate::resource::{ChangeEvent, ResourceDocument, ResourceKind};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of change events for one kind. Ends when the subscription closes.
pub type ChangeStream = BoxStream<'static, ProviderResult<ChangeEvent>>;

/// Source of live cluster state.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// List every resource of a kind, across all namespaces.
    async fn list(&self, kind: &ResourceKind) -> ProviderResult<Vec<ResourceDocument>>;

    /// Open a change stream for a kind.
    async fn subscribe(&self, kind: &ResourceKind) -> ProviderResult<ChangeStream>;
}
