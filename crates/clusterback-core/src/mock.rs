//! In-memory collaborators for testing.
//!
//! [`MockResourceProvider`] serves configurable listings and hand-fed change
//! streams. [`RecordingApplier`] records every payload it is asked to apply.

use crate::applier::{Applier, ApplyReport};
use crate::error::{ApplierError, ApplierResult, ProviderError, ProviderResult};
use crate::payload;
use crate::provider::{ChangeStream, ResourceProvider};
use crate::resource::{ChangeEvent, ChangeType, ResourceDocument, ResourceKind, ResourceRef};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<ProviderResult<ChangeEvent>>;

/// Resource provider backed by in-memory objects.
#[derive(Default)]
pub struct MockResourceProvider {
    objects: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    list_failures: Mutex<HashMap<String, String>>,
    subscribe_failures: Mutex<HashMap<String, String>>,
    senders: Mutex<HashMap<String, Vec<EventSender>>>,
    subscriptions: Mutex<HashMap<String, usize>>,
    list_delay: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
}

impl MockResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the objects listed for a kind.
    pub fn set_objects(&self, kind: &str, objects: Vec<serde_json::Value>) {
        lock(&self.objects).insert(kind.to_string(), objects);
    }

    /// Make listing a kind fail until [`Self::clear_failures`] is called.
    pub fn fail_list(&self, kind: &str, message: &str) {
        lock(&self.list_failures).insert(kind.to_string(), message.to_string());
    }

    /// Make subscribing to a kind fail until [`Self::clear_failures`] is called.
    pub fn fail_subscribe(&self, kind: &str, message: &str) {
        lock(&self.subscribe_failures).insert(kind.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.list_failures).clear();
        lock(&self.subscribe_failures).clear();
    }

    /// Delay every listing, to make captures observably slow.
    pub fn set_list_delay(&self, delay: Duration) {
        *lock(&self.list_delay) = Some(delay);
    }

    /// Total number of `list` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of successful subscriptions opened for a kind.
    pub fn subscriptions(&self, kind: &str) -> usize {
        lock(&self.subscriptions).get(kind).copied().unwrap_or(0)
    }

    /// Push a change event to every open stream of a kind.
    ///
    /// Returns how many streams received it.
    pub fn emit(&self, kind: &str, change: ChangeType) -> usize {
        self.send(kind, || Ok(ChangeEvent::new(ResourceKind::from(kind), change, None)))
    }

    /// Push a stream error to every open stream of a kind.
    pub fn emit_error(&self, kind: &str, message: &str) -> usize {
        self.send(kind, || {
            Err(ProviderError::Stream {
                kind: kind.to_string(),
                message: message.to_string(),
            })
        })
    }

    /// End every open stream of a kind.
    pub fn close_streams(&self, kind: &str) {
        lock(&self.senders).remove(kind);
    }

    fn send(&self, kind: &str, item: impl Fn() -> ProviderResult<ChangeEvent>) -> usize {
        let mut senders = lock(&self.senders);
        let list = senders.entry(kind.to_string()).or_default();
        list.retain(|tx| !tx.is_closed());
        list.iter().filter(|tx| tx.send(item()).is_ok()).count()
    }
}

#[async_trait]
impl ResourceProvider for MockResourceProvider {
    async fn list(&self, kind: &ResourceKind) -> ProviderResult<Vec<ResourceDocument>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.list_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = lock(&self.list_failures).get(kind.as_str()) {
            return Err(ProviderError::List {
                kind: kind.to_string(),
                message: message.clone(),
            });
        }

        let objects = lock(&self.objects)
            .get(kind.as_str())
            .cloned()
            .unwrap_or_default();
        Ok(objects
            .into_iter()
            .filter_map(|o| ResourceDocument::from_value(o).ok())
            .collect())
    }

    async fn subscribe(&self, kind: &ResourceKind) -> ProviderResult<ChangeStream> {
        if let Some(message) = lock(&self.subscribe_failures).get(kind.as_str()) {
            return Err(ProviderError::Subscribe {
                kind: kind.to_string(),
                message: message.clone(),
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&self.senders)
            .entry(kind.to_string())
            .or_default()
            .push(tx);
        *lock(&self.subscriptions)
            .entry(kind.to_string())
            .or_default() += 1;

        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Ok(stream.boxed())
    }
}

/// Applier that records payloads instead of touching a cluster.
#[derive(Default)]
pub struct RecordingApplier {
    calls: Mutex<Vec<Vec<u8>>>,
    failure: Mutex<Option<(usize, String)>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the document at `index` (payload order) with `message`.
    pub fn fail_at(&self, index: usize, message: &str) {
        *lock(&self.failure) = Some((index, message.to_string()));
    }

    /// Every payload passed to `apply`, in call order.
    pub fn calls(&self) -> Vec<Vec<u8>> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Applier for RecordingApplier {
    async fn apply(&self, payload: &[u8]) -> ApplierResult<ApplyReport> {
        lock(&self.calls).push(payload.to_vec());

        let documents =
            payload::decode(payload).map_err(|e| ApplierError::InvalidPayload(e.to_string()))?;
        let failure = lock(&self.failure).clone();

        let mut applied: Vec<ResourceRef> = Vec::new();
        for (index, doc) in documents.into_iter().enumerate() {
            if let Some((at, message)) = &failure {
                if *at == index {
                    return Err(ApplierError::Document {
                        identity: Some(doc.identity),
                        applied,
                        message: message.clone(),
                    });
                }
            }
            applied.push(doc.identity);
        }
        Ok(ApplyReport { applied })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
