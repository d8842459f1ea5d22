//! Incremental decoding of `kubectl get --watch --output-watch-events -o json`.
//!
//! kubectl prints one JSON object per event, pretty-printed and simply
//! concatenated. Objects can straddle read boundaries, so bytes are buffered
//! until a complete object is available.

use clusterback_core::{ChangeEvent, ChangeType, ProviderError, ProviderResult, ResourceKind, ResourceRef};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

#[derive(Debug, Deserialize)]
struct WatchEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    object: Value,
}

/// Buffers watch output and yields change events.
#[derive(Debug)]
pub struct WatchDecoder {
    kind: ResourceKind,
    buffer: Vec<u8>,
}

impl WatchDecoder {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            buffer: Vec::new(),
        }
    }

    /// Append raw output.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete event, if one is buffered.
    ///
    /// Bookmarks are skipped. An `ERROR` event (e.g. an expired resource
    /// version) is returned as a stream error.
    pub fn next_event(&mut self) -> Option<ProviderResult<ChangeEvent>> {
        loop {
            match self.buffer.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(start) => {
                    self.buffer.drain(..start);
                }
                None => {
                    self.buffer.clear();
                    return None;
                }
            }

            let (parsed, consumed) = {
                let mut events =
                    serde_json::Deserializer::from_slice(&self.buffer).into_iter::<WatchEvent>();
                let parsed = events.next();
                (parsed, events.byte_offset())
            };

            match parsed {
                None => return None,
                Some(Err(e)) if e.is_eof() => return None,
                Some(Err(e)) => {
                    self.buffer.clear();
                    return Some(Err(self.stream_error(format!("malformed watch event: {e}"))));
                }
                Some(Ok(event)) => {
                    self.buffer.drain(..consumed);
                    if let Some(result) = self.convert(event) {
                        return Some(result);
                    }
                }
            }
        }
    }

    fn convert(&self, event: WatchEvent) -> Option<ProviderResult<ChangeEvent>> {
        if event.event_type.eq_ignore_ascii_case("ERROR") {
            let message = event
                .object
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("watch error")
                .to_string();
            return Some(Err(self.stream_error(message)));
        }

        let Some(change) = ChangeType::parse(&event.event_type) else {
            trace!(kind = %self.kind, event_type = %event.event_type, "Skipping watch event");
            return None;
        };
        let identity = ResourceRef::from_value(&event.object).ok();
        Some(Ok(ChangeEvent::new(self.kind.clone(), change, identity)))
    }

    fn stream_error(&self, message: String) -> ProviderError {
        ProviderError::Stream {
            kind: self.kind.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDED: &str = r#"{
    "type": "ADDED",
    "object": {
        "kind": "Pod",
        "metadata": {"name": "web-1", "namespace": "default"}
    }
}"#;

    const DELETED: &str =
        r#"{"type":"DELETED","object":{"kind":"Pod","metadata":{"name":"web-0","namespace":"default"}}}"#;

    fn decoder() -> WatchDecoder {
        WatchDecoder::new(ResourceKind::from("pods"))
    }

    #[test]
    fn test_decodes_concatenated_events() {
        let mut d = decoder();
        d.push(format!("{ADDED}\n{DELETED}\n").as_bytes());

        let first = d.next_event().unwrap().unwrap();
        assert_eq!(first.change, ChangeType::Added);
        assert_eq!(first.identity.unwrap().to_string(), "Pod/default/web-1");

        let second = d.next_event().unwrap().unwrap();
        assert_eq!(second.change, ChangeType::Deleted);
        assert!(d.next_event().is_none());
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn test_waits_for_split_objects() {
        let mut d = decoder();
        let (head, tail) = ADDED.split_at(40);
        d.push(head.as_bytes());
        assert!(d.next_event().is_none());
        assert!(d.pending() > 0);

        d.push(tail.as_bytes());
        let event = d.next_event().unwrap().unwrap();
        assert_eq!(event.kind, ResourceKind::from("pods"));
    }

    #[test]
    fn test_skips_bookmarks() {
        let mut d = decoder();
        d.push(br#"{"type":"BOOKMARK","object":{"kind":"Pod","metadata":{"resourceVersion":"12"}}}"#);
        d.push(DELETED.as_bytes());
        assert_eq!(d.next_event().unwrap().unwrap().change, ChangeType::Deleted);
    }

    #[test]
    fn test_error_event_fails_stream() {
        let mut d = decoder();
        d.push(br#"{"type":"ERROR","object":{"kind":"Status","message":"too old resource version"}}"#);
        let err = d.next_event().unwrap().unwrap_err();
        assert!(err.to_string().contains("too old resource version"));
    }

    #[test]
    fn test_garbage_is_reported_and_dropped() {
        let mut d = decoder();
        d.push(b"Error from server (Forbidden)");
        assert!(d.next_event().unwrap().is_err());
        assert_eq!(d.pending(), 0);
    }
}
