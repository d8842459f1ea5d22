//! Resource provider backed by kubectl.

use crate::command::Kubectl;
use crate::watch::WatchDecoder;
use async_trait::async_trait;
use clusterback_core::{
    ChangeStream, ProviderError, ProviderResult, ResourceDocument, ResourceKind, ResourceProvider,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const READ_CHUNK: usize = 8192;

/// Lists and watches resources through `kubectl get`.
#[derive(Debug, Clone, Default)]
pub struct KubectlProvider {
    kubectl: Kubectl,
}

impl KubectlProvider {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }
}

#[async_trait]
impl ResourceProvider for KubectlProvider {
    async fn list(&self, kind: &ResourceKind) -> ProviderResult<Vec<ResourceDocument>> {
        let output = self
            .kubectl
            .run(&["get", kind.as_str(), "--all-namespaces", "-o", "json"], None)
            .await
            .map_err(|e| ProviderError::List {
                kind: kind.to_string(),
                message: e.to_string(),
            })?;
        parse_list(kind, &output)
    }

    async fn subscribe(&self, kind: &ResourceKind) -> ProviderResult<ChangeStream> {
        let mut child = self
            .kubectl
            .command(&[
                "get",
                kind.as_str(),
                "--all-namespaces",
                "--watch-only",
                "--output-watch-events",
                "-o",
                "json",
            ])
            .spawn()
            .map_err(|e| ProviderError::Subscribe {
                kind: kind.to_string(),
                message: format!("failed to run {}: {e}", self.kubectl.binary()),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| ProviderError::Subscribe {
            kind: kind.to_string(),
            message: "kubectl stdout not captured".to_string(),
        })?;
        // Drained alongside stdout so a chatty kubectl cannot fill the pipe
        // and stall the watch.
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text).await;
                text
            })
        });
        let kind = kind.clone();
        info!(kind = %kind, "Started kubectl watch");

        let stream = async_stream::stream! {
            let mut decoder = WatchDecoder::new(kind.clone());
            let mut chunk = vec![0u8; READ_CHUNK];

            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        decoder.push(&chunk[..n]);
                        while let Some(event) = decoder.next_event() {
                            yield event;
                        }
                    }
                    Err(e) => {
                        yield Err(ProviderError::Stream {
                            kind: kind.to_string(),
                            message: e.to_string(),
                        });
                        return;
                    }
                }
            }

            let stderr = match stderr {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(kind = %kind, "kubectl watch exited");
                }
                Ok(status) => {
                    yield Err(ProviderError::Stream {
                        kind: kind.to_string(),
                        message: format!("kubectl exited with {status}: {}", stderr.trim()),
                    });
                }
                Err(e) => {
                    yield Err(ProviderError::Stream {
                        kind: kind.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Parse `kubectl get -o json` output into documents.
///
/// Items without a `kind` or name are skipped.
pub fn parse_list(kind: &ResourceKind, output: &[u8]) -> ProviderResult<Vec<ResourceDocument>> {
    let list: Value = serde_json::from_slice(output).map_err(|e| ProviderError::List {
        kind: kind.to_string(),
        message: format!("invalid JSON from kubectl: {e}"),
    })?;

    let items = match list.get("items") {
        Some(Value::Array(items)) => items.clone(),
        Some(_) | None => {
            return Err(ProviderError::List {
                kind: kind.to_string(),
                message: "kubectl output has no items".to_string(),
            })
        }
    };

    let mut documents = Vec::with_capacity(items.len());
    for item in items {
        match ResourceDocument::from_value(item) {
            Ok(doc) => documents.push(doc),
            Err(e) => debug!(kind = %kind, error = %e, "Skipping item"),
        }
    }
    Ok(documents)
}
