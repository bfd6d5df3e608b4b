//! Hashing System - SHA-256 for Rendered Documents
//!
//! Deterministic digests so an identical request can be recognised and a
//! delivered document can be checked byte for byte.

use sha2::{Sha256, Digest};
use serde::Serialize;
use serde_json::{json, Value, to_string};

use crate::templates::DocumentFormat;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), sort_value(v))).collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// job_hash = sha256(canonical {templateId, outputFormat, payload})
pub fn compute_job_hash(
    template_id: &str,
    output_format: DocumentFormat,
    payload: &impl Serialize,
) -> Result<String, serde_json::Error> {
    let job = json!({
        "templateId": template_id,
        "outputFormat": output_format,
        "payload": serde_json::to_value(payload)?,
    });
    Ok(sha256_hex(canonical_json(&job)?.as_bytes()))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": {"y": 2, "b": 3}, "m": [{"k": 1, "c": 2}]});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":{"b":3,"y":2},"m":[{"c":2,"k":1}],"z":1}"#);
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_job_hash_ignores_key_order() {
        let a = json!({"title": "x", "count": 2});
        let b = json!({"count": 2, "title": "x"});
        assert_eq!(
            compute_job_hash("t-1", DocumentFormat::Pdf, &a).unwrap(),
            compute_job_hash("t-1", DocumentFormat::Pdf, &b).unwrap()
        );
    }

    #[test]
    fn test_job_hash_depends_on_format() {
        let payload = json!({"title": "x"});
        assert_ne!(
            compute_job_hash("t-1", DocumentFormat::Pdf, &payload).unwrap(),
            compute_job_hash("t-1", DocumentFormat::Docx, &payload).unwrap()
        );
    }
}
