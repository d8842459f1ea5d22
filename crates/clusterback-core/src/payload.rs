//! Deterministic payload encoding.
//!
//! A payload is multi-document YAML, one document per resource, each
//! document introduced by `---`. Documents are ordered by identity and
//! mapping keys are sorted recursively, so the same live state always
//! encodes to the same bytes no matter what order the provider returned it
//! in. An empty snapshot encodes to an empty payload.

use crate::error::PayloadError;
use crate::resource::{ResourceDocument, ResourceRef};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value as YamlValue};

/// Separator written before every document.
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// A document rendered to canonical YAML text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RenderedDocument {
    pub identity: ResourceRef,
    pub text: String,
}

/// Render documents to canonical YAML, in payload order.
pub fn render(documents: &[ResourceDocument]) -> Result<Vec<RenderedDocument>, PayloadError> {
    let mut rendered = documents
        .iter()
        .map(|doc| {
            Ok(RenderedDocument {
                identity: doc.identity.clone(),
                text: serde_yaml::to_string(&canonicalize(&doc.body))?,
            })
        })
        .collect::<Result<Vec<_>, PayloadError>>()?;
    // Text breaks ties between documents sharing an identity.
    rendered.sort();
    Ok(rendered)
}

/// Encode a snapshot into payload bytes.
pub fn encode(documents: &[ResourceDocument]) -> Result<Vec<u8>, PayloadError> {
    Ok(join(&render(documents)?).into_bytes())
}

/// Join rendered documents into payload text.
pub fn join(rendered: &[RenderedDocument]) -> String {
    let mut out = String::new();
    for doc in rendered {
        out.push_str(DOCUMENT_SEPARATOR);
        out.push_str(&doc.text);
    }
    out
}

/// Decode payload bytes back into documents. Empty documents are skipped.
pub fn decode(payload: &[u8]) -> Result<Vec<ResourceDocument>, PayloadError> {
    let text = std::str::from_utf8(payload)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = JsonValue::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let doc = ResourceDocument::from_value(value)
            .map_err(|e| PayloadError::Document(e.to_string()))?;
        documents.push(doc);
    }
    Ok(documents)
}

/// Convert a JSON value into a YAML value with mapping keys in sorted order.
pub fn canonicalize(value: &JsonValue) -> YamlValue {
    match value {
        JsonValue::Null => YamlValue::Null,
        JsonValue::Bool(b) => YamlValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                YamlValue::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                YamlValue::Number(u.into())
            } else {
                YamlValue::Number(n.as_f64().unwrap_or_default().into())
            }
        }
        JsonValue::String(s) => YamlValue::String(s.clone()),
        JsonValue::Array(items) => YamlValue::Sequence(items.iter().map(canonicalize).collect()),
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut mapping = Mapping::new();
            for key in keys {
                mapping.insert(YamlValue::String(key.clone()), canonicalize(&map[key]));
            }
            YamlValue::Mapping(mapping)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> ResourceDocument {
        ResourceDocument::from_value(value).unwrap()
    }

    fn sample() -> Vec<ResourceDocument> {
        vec![
            doc(json!({
                "kind": "Service",
                "metadata": {"namespace": "default", "name": "web"},
                "spec": {"ports": [{"port": 80}]}
            })),
            doc(json!({
                "kind": "ConfigMap",
                "metadata": {"name": "settings", "namespace": "default"},
                "data": {"b": "2", "a": "1"}
            })),
            doc(json!({"kind": "ClusterRole", "metadata": {"name": "admin"}})),
        ]
    }

    #[test]
    fn test_encoding_ignores_provider_order() {
        let docs = sample();
        let mut reversed = docs.clone();
        reversed.reverse();
        assert_eq!(encode(&docs).unwrap(), encode(&reversed).unwrap());
    }

    #[test]
    fn test_documents_are_sorted_and_separated() {
        let text = String::from_utf8(encode(&sample()).unwrap()).unwrap();
        assert!(text.starts_with("---\n"));
        assert_eq!(text.matches("---\n").count(), 3);
        let role = text.find("kind: ClusterRole").unwrap();
        let config = text.find("kind: ConfigMap").unwrap();
        let service = text.find("kind: Service").unwrap();
        assert!(role < config && config < service);
    }

    #[test]
    fn test_keys_are_sorted_recursively() {
        let text = String::from_utf8(encode(&sample()).unwrap()).unwrap();
        let a = text.find("a: '1'").unwrap();
        let b = text.find("b: '2'").unwrap();
        assert!(a < b);
        let name = text.find("name: settings").unwrap();
        let namespace = text.find("namespace: default").unwrap();
        assert!(name < namespace);
    }

    #[test]
    fn test_empty_snapshot_is_empty_payload() {
        assert!(encode(&[]).unwrap().is_empty());
        assert!(decode(b"").unwrap().is_empty());
        assert!(decode(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_restores_documents() {
        let docs = sample();
        let decoded = decode(&encode(&docs).unwrap()).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].identity.to_string(), "ClusterRole/admin");
        assert_eq!(decoded[2].body["spec"]["ports"][0]["port"], json!(80));
        assert_eq!(decoded[1].body["data"]["a"], json!("1"));
    }

    #[test]
    fn test_decode_skips_null_documents() {
        let payload = b"---\n---\nkind: Pod\nmetadata:\n  name: x\n";
        let decoded = decode(payload).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].kind(), "Pod");
    }

    #[test]
    fn test_decode_rejects_non_resources() {
        let err = decode(b"---\nfoo: bar\n").unwrap_err();
        assert!(matches!(err, PayloadError::Document(_)));
        let err = decode(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, PayloadError::Utf8(_)));
    }
}
