//! Applier backed by `kubectl apply`.

use crate::command::Kubectl;
use async_trait::async_trait;
use clusterback_core::{payload, Applier, ApplierError, ApplierResult, ApplyReport, ResourceRef};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Metadata fields owned by the API server.
const SERVER_METADATA: &[&str] = &[
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "managedFields",
    "generation",
    "selfLink",
];

/// Applies documents one at a time with `kubectl apply -f -`.
///
/// Stops at the first rejected document.
#[derive(Debug, Clone, Default)]
pub struct KubectlApplier {
    kubectl: Kubectl,
}

impl KubectlApplier {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }
}

#[async_trait]
impl Applier for KubectlApplier {
    async fn apply(&self, payload: &[u8]) -> ApplierResult<ApplyReport> {
        let documents =
            payload::decode(payload).map_err(|e| ApplierError::InvalidPayload(e.to_string()))?;
        info!(documents = documents.len(), "Applying payload");

        let mut applied: Vec<ResourceRef> = Vec::with_capacity(documents.len());
        for doc in documents {
            let mut body = doc.body;
            strip_server_fields(&mut body);
            let manifest = serde_json::to_vec(&body)
                .map_err(|e| ApplierError::InvalidPayload(e.to_string()))?;

            match self.kubectl.run(&["apply", "-f", "-"], Some(&manifest)).await {
                Ok(output) => {
                    debug!(
                        resource = %doc.identity,
                        output = %String::from_utf8_lossy(&output).trim(),
                        "Applied"
                    );
                    applied.push(doc.identity);
                }
                Err(e) if e.is_transport() && applied.is_empty() => {
                    return Err(ApplierError::Transport(e.to_string()));
                }
                Err(e) => {
                    warn!(resource = %doc.identity, error = %e, "Apply rejected");
                    return Err(ApplierError::Document {
                        identity: Some(doc.identity),
                        applied,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(ApplyReport { applied })
    }
}

/// Remove status and server-managed metadata so the manifest can be
/// re-applied.
pub fn strip_server_fields(body: &mut Value) {
    let Some(object) = body.as_object_mut() else {
        return;
    };
    object.remove("status");
    if let Some(Value::Object(metadata)) = object.get_mut("metadata") {
        for field in SERVER_METADATA {
            metadata.remove(*field);
        }
    }
}
