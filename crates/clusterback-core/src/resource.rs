//! Resource model: kinds, identities, documents and change events.

use crate::error::{ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource kinds captured when no explicit list is configured.
pub const DEFAULT_KINDS: &[&str] = &[
    "pods",
    "services",
    "configmaps",
    "persistentvolumeclaims",
    "persistentvolumes",
    "serviceaccounts",
    "deployments",
    "replicasets",
    "statefulsets",
    "daemonsets",
    "jobs",
    "cronjobs",
    "ingresses",
    "networkpolicies",
    "horizontalpodautoscalers",
    "roles",
    "rolebindings",
    "clusterroles",
    "clusterrolebindings",
];

/// A category of managed objects, as the provider names it (e.g. `deployments`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The default kind list.
    pub fn defaults() -> Vec<Self> {
        DEFAULT_KINDS.iter().map(|k| Self::new(*k)).collect()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of a single resource.
///
/// Ordering is kind, then namespace (cluster-scoped first), then name, which
/// is also the document order inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Read the identity out of a raw object.
    pub fn from_value(body: &serde_json::Value) -> ProviderResult<Self> {
        let kind = body
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidDocument("object has no kind".to_string()))?;
        let metadata = body.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::InvalidDocument(format!("{kind} object has no metadata.name"))
            })?;
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .filter(|ns| !ns.is_empty());
        Ok(Self::new(kind, namespace, name))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// One resource in a snapshot: its identity and opaque body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    pub identity: ResourceRef,
    pub body: serde_json::Value,
}

impl ResourceDocument {
    /// Build a document from a raw object. Fails when `kind` or
    /// `metadata.name` is missing.
    pub fn from_value(body: serde_json::Value) -> ProviderResult<Self> {
        let identity = ResourceRef::from_value(&body)?;
        Ok(Self { identity, body })
    }

    /// The document's `kind` field (e.g. `Deployment`).
    pub fn kind(&self) -> &str {
        &self.identity.kind
    }
}

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

impl ChangeType {
    /// Parse a watch event type (`ADDED`, `MODIFIED`, `DELETED`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ADDED" => Some(ChangeType::Added),
            "MODIFIED" => Some(ChangeType::Modified),
            "DELETED" => Some(ChangeType::Deleted),
            _ => None,
        }
    }
}

/// A change notification. Only its arrival matters to the watch coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ResourceKind,
    pub change: ChangeType,
    pub identity: Option<ResourceRef>,
}

impl ChangeEvent {
    pub fn new(kind: ResourceKind, change: ChangeType, identity: Option<ResourceRef>) -> Self {
        Self {
            kind,
            change,
            identity,
        }
    }
}
