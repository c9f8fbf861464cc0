//! Sync envelope: a full snapshot of the structure tree and every record,
//! exchanged between installations as JSON.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub timestamp: String,
    pub structure: Value,
    pub records: Vec<Value>,
}

impl Envelope {
    pub fn new(structure: Value, records: Vec<Value>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            timestamp: chrono::Utc::now().to_rfc3339(),
            structure,
            records,
        }
    }

    /// The part the reconciler consumes.
    pub fn tree(&self) -> Value {
        json!({ "structure": self.structure, "records": self.records })
    }
}

fn malformed(msg: impl Into<String>) -> CoreError {
    CoreError::MalformedInput(msg.into())
}

fn record_lrn(record: &Value) -> Option<String> {
    let lrn = record.get("info")?.get("lrn")?.as_str()?.trim();
    (!lrn.is_empty()).then(|| lrn.to_string())
}

fn has_id(record: &Value) -> bool {
    match record.get("id") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

/// Validate a parsed envelope. Every record must be an object carrying an
/// `id` or an `info.lrn`; the id is derived from the LRN when missing.
pub fn validate(root: Value) -> CoreResult<Envelope> {
    let Value::Object(mut root) = root else {
        return Err(malformed("envelope must be a JSON object"));
    };
    let structure = match root.remove("structure") {
        Some(v @ Value::Object(_)) => v,
        Some(_) => return Err(malformed("envelope.structure must be an object")),
        None => return Err(malformed("envelope is missing structure")),
    };
    let records = match root.remove("records") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(malformed("envelope.records must be an array")),
        None => return Err(malformed("envelope is missing records")),
    };

    let mut checked = Vec::with_capacity(records.len());
    for (i, mut record) in records.into_iter().enumerate() {
        if !record.is_object() {
            return Err(malformed(format!("records[{i}] is not an object")));
        }
        if !has_id(&record) {
            let Some(lrn) = record_lrn(&record) else {
                return Err(malformed(format!("records[{i}] has neither id nor info.lrn")));
            };
            record["id"] = Value::String(lrn);
        }
        checked.push(record);
    }

    let version = root
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(ENVELOPE_VERSION);
    let timestamp = root
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Envelope {
        version,
        timestamp,
        structure,
        records: checked,
    })
}

pub fn decode(bytes: &[u8]) -> CoreResult<Envelope> {
    let root: Value = serde_json::from_slice(bytes)
        .map_err(|e| malformed(format!("envelope is not valid JSON: {e}")))?;
    validate(root)
}

pub fn encode(envelope: &Envelope) -> CoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(envelope).map_err(anyhow::Error::from)?)
}

/// Compact encoding for the online relay, refused above `max_bytes`.
pub fn encode_transport(envelope: &Envelope, max_bytes: usize) -> CoreResult<Vec<u8>> {
    let bytes = encode(envelope)?;
    if bytes.len() > max_bytes {
        return Err(CoreError::Resource(format!(
            "payload is {} bytes, relay limit is {max_bytes}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Size check happens before any parsing.
pub fn decode_transport(bytes: &[u8], max_bytes: usize) -> CoreResult<Envelope> {
    if bytes.len() > max_bytes {
        return Err(CoreError::Resource(format!(
            "payload is {} bytes, relay limit is {max_bytes}",
            bytes.len()
        )));
    }
    decode(bytes)
}

/// Hex SHA-256 of a payload.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(
            json!({"Grade 11": {}}),
            vec![json!({"id": "1", "info": {"lname": "A", "lrn": "111"}})],
        )
    }

    #[test]
    fn encode_then_decode_keeps_content() {
        let env = sample();
        let back = decode(&encode(&env).expect("encode")).expect("decode");
        assert_eq!(back, env);
        assert!(chrono::DateTime::parse_from_rfc3339(&back.timestamp).is_ok());
    }

    #[test]
    fn rejects_bad_shapes() {
        let cases: [&[u8]; 8] = [
            b"not json",
            br#"[1,2]"#,
            br#"{"records": []}"#,
            br#"{"structure": [], "records": []}"#,
            br#"{"structure": {}}"#,
            br#"{"structure": {}, "records": {}}"#,
            br#"{"structure": {}, "records": [5]}"#,
            br#"{"structure": {}, "records": [{"info": {"lname": "A"}}]}"#,
        ];
        for case in cases {
            let err = decode(case).unwrap_err();
            assert_eq!(err.code(), "malformed_input", "{}", String::from_utf8_lossy(case));
        }
    }

    #[test]
    fn derives_id_from_lrn() {
        let env = decode(br#"{"version": 1, "structure": {}, "records": [{"info": {"lrn": " 1234 "}}]}"#)
            .expect("decode");
        assert_eq!(env.records[0]["id"], "1234");
        assert_eq!(env.timestamp, "");
    }

    #[test]
    fn transport_ceiling_applies_both_ways() {
        let env = sample();
        let size = encode(&env).expect("encode").len();
        assert!(encode_transport(&env, size).is_ok());
        assert_eq!(encode_transport(&env, size - 1).unwrap_err().code(), "resource");
        let big = vec![b' '; 32];
        assert_eq!(decode_transport(&big, 16).unwrap_err().code(), "resource");
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
