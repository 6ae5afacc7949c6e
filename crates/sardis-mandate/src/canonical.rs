//! Deterministic JSON canonicalization and hashing.
//!
//! The canonical form is the byte string every mandate signature commits to:
//! object keys sorted lexicographically, no insignificant whitespace, UTF-8,
//! numeric forms preserved exactly as parsed. Two semantically equal values
//! always canonicalize to identical bytes.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::MandateError;

/// Canonicalize any serializable value into deterministic JSON bytes.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, MandateError> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(256);
    write_canonical(&value, &mut out);
    Ok(out)
}

/// SHA-256 over canonical bytes.
pub fn hash_sha256(bytes: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(bytes);
    digest.into()
}

/// Canonical hash of a serializable value, hex-encoded.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, MandateError> {
    Ok(hex::encode(hash_sha256(&canonicalize(value)?)))
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // serde_json's map is a BTreeMap here, but sort explicitly so the
            // invariant survives a preserve_order feature unification.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(key, out);
                out.push(b':');
                write_canonical(&map[key], out);
            }
            out.push(b'}');
        }
    }
}

fn write_json_string(s: &str, out: &mut Vec<u8>) {
    // serde_json escapes deterministically; reuse it for string literals.
    let escaped = serde_json::to_string(s).expect("string serialization is infallible");
    out.extend_from_slice(escaped.as_bytes());
}
