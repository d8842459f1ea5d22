//! Error types for the core crate.

use crate::resource::ResourceRef;
use clusterback_store::{StoreError, VersionId};
use thiserror::Error;

/// Core error types.
///
/// Every variant carries the operation that failed so messages read well on
/// their own at the CLI and HTTP boundaries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A version id that the store does not know.
    #[error("{operation}: unknown version id {version_id}")]
    NotFound {
        operation: &'static str,
        version_id: VersionId,
    },

    /// The resource provider failed.
    #[error("{operation}: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    /// The version store failed.
    #[error("{operation}: store error: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// The applier rejected a rollback.
    #[error("rollback to {version_id} failed: {source}")]
    Applier {
        version_id: VersionId,
        #[source]
        source: ApplierError,
    },

    /// A payload could not be encoded or decoded.
    #[error("{operation}: {source}")]
    Payload {
        operation: &'static str,
        #[source]
        source: PayloadError,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap a store error, turning `NotFound` into [`CoreError::NotFound`].
    pub fn store(operation: &'static str, version_id: Option<&VersionId>, source: StoreError) -> Self {
        match (source.is_not_found(), version_id) {
            (true, Some(id)) => CoreError::NotFound {
                operation,
                version_id: id.clone(),
            },
            _ => CoreError::Store { operation, source },
        }
    }

    /// Whether this error means the requested version does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    /// Stable machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Provider { .. } => "PROVIDER_ERROR",
            CoreError::Store { .. } => "STORE_ERROR",
            CoreError::Applier { .. } => "APPLY_FAILED",
            CoreError::Payload { .. } => "INVALID_PAYLOAD",
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Io(_) => "IO_ERROR",
        }
    }
}

/// Resource provider errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Listing a kind failed.
    #[error("failed to list {kind}: {message}")]
    List { kind: String, message: String },

    /// Opening a change stream failed.
    #[error("failed to subscribe to {kind}: {message}")]
    Subscribe { kind: String, message: String },

    /// An open change stream failed.
    #[error("change stream for {kind} failed: {message}")]
    Stream { kind: String, message: String },

    /// A raw object could not be turned into a resource document.
    #[error("invalid resource document: {0}")]
    InvalidDocument(String),
}

/// Applier errors.
#[derive(Debug, Error)]
pub enum ApplierError {
    /// A document was rejected. Earlier documents were applied and stay live.
    #[error(
        "failed to apply {}: {message} ({} document(s) applied before the failure remain live)",
        .identity.as_ref().map(ToString::to_string).unwrap_or_else(|| "document".to_string()),
        .applied.len()
    )]
    Document {
        identity: Option<ResourceRef>,
        applied: Vec<ResourceRef>,
        message: String,
    },

    /// The payload could not be decoded into documents.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The applier could not reach the cluster at all.
    #[error("applier transport failed: {0}")]
    Transport(String),
}

/// Payload encoding errors.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Payload bytes are not UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is not valid YAML.
    #[error("payload is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A YAML document is not a resource.
    #[error("invalid resource document: {0}")]
    Document(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for resource provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type for applier calls.
pub type ApplierResult<T> = Result<T, ApplierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_becomes_core_not_found() {
        let id = VersionId::from("abc1234");
        let err = CoreError::store("diff", Some(&id), StoreError::not_found("abc1234"));
        assert!(err.is_not_found());
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "diff: unknown version id abc1234");
    }

    #[test]
    fn test_store_failure_stays_store_error() {
        let err = CoreError::store("capture", None, StoreError::operation_failed("disk full"));
        assert!(!err.is_not_found());
        assert_eq!(err.code(), "STORE_ERROR");
        assert!(err.to_string().starts_with("capture: store error"));
    }

    #[test]
    fn test_document_error_names_failing_resource() {
        let err = ApplierError::Document {
            identity: Some(ResourceRef::new("Deployment", Some("default"), "web")),
            applied: vec![ResourceRef::new("ConfigMap", Some("default"), "settings")],
            message: "admission webhook denied".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Deployment/default/web"));
        assert!(msg.contains("admission webhook denied"));
        assert!(msg.contains("1 document(s) applied before the failure remain live"));
    }

    #[test]
    fn test_document_error_without_identity() {
        let err = ApplierError::Document {
            identity: None,
            applied: vec![],
            message: "boom".to_string(),
        };
        assert!(err.to_string().starts_with("failed to apply document: boom"));
    }
}
