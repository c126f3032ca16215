//! SHA-256 fingerprints shared by the idempotency coordinator and the ETag
//! tagger.

use {
    serde_json::Value,
    sha2::{Digest, Sha256},
    std::fmt::Write,
};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Serializes `value` as compact JSON with object keys sorted at every depth.
///
/// Two values that differ only in key order serialize identically.
///
/// ```
/// use supplygraph_edge::fingerprint::canonical_json;
/// use serde_json::json;
///
/// let a = canonical_json(&json!({"b": 1, "a": {"d": 2, "c": 3}}));
/// assert_eq!(a, r#"{"a":{"c":3,"d":2},"b":1}"#);
/// ```
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_json_string(s, out),
        scalar => {
            // null, bool and numbers have a single JSON rendering
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    let _ = write!(out, "{}", Value::String(s.to_owned()));
}

/// Weak validator over `payload`: `W/"<first len hex chars of SHA-256>"`.
///
/// `len` is clamped to the 64 characters a SHA-256 digest has.
pub fn weak_etag(payload: &[u8], len: usize) -> String {
    let digest = sha256_hex(payload);
    let len = len.min(digest.len());
    format!("W/\"{}\"", &digest[..len])
}
