//! Idempotency key extraction and derivation.
//!
//! A client may name the logical operation itself through the
//! `Idempotency-Key` (or `X-Idempotency-Key`) header. Without one, the key is
//! the SHA-256 of a canonical JSON description of the request:
//!
//! ```text
//! { "method", "path", "body", "params", "query", "file"? }
//! ```

use {
    crate::{
        Error, Result,
        fingerprint::{canonical_json, sha256_hex},
    },
    http::{HeaderMap, HeaderName, Method, header::CONTENT_TYPE, request::Parts},
    serde_json::{Map, Value, json},
    sha2::{Digest, Sha256},
    std::{fmt, path::PathBuf},
    tokio::io::AsyncReadExt,
};

/// Primary request header carrying a client-chosen key.
pub static IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");

/// Alternate request header, and the response header echoing the key in use.
pub static X_IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("x-idempotency-key");

/// The identifier a mutating operation's result is cached under.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the key, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdempotencyKey({}..)", self.short())
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// POST, PUT and PATCH are coordinated; every other method passes through.
pub fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Returns the trimmed client key, preferring `Idempotency-Key` over
/// `X-Idempotency-Key`. Blank or non-text values count as absent.
pub fn client_key(headers: &HeaderMap) -> Option<IdempotencyKey> {
    [&IDEMPOTENCY_KEY, &X_IDEMPOTENCY_KEY]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(IdempotencyKey::new)
}

/// A file received with the request, stored by an upstream upload layer.
///
/// Insert it as a request extension so it participates in key derivation.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
    pub mimetype: String,
}

/// Derives the key of a request from its method, path, matched path
/// parameters, query, buffered body and uploaded file.
///
/// Fails only when the upload location cannot be inspected at all; callers
/// treat that as "no idempotency for this request".
pub async fn derive_key(
    parts: &Parts,
    params: &[(String, String)],
    body: &[u8],
) -> Result<IdempotencyKey> {
    let mut descriptor = Map::new();
    descriptor.insert("method".into(), Value::from(parts.method.as_str()));
    descriptor.insert("path".into(), Value::from(parts.uri.path()));
    descriptor.insert("body".into(), body_value(&parts.headers, body));
    descriptor.insert("params".into(), params_value(params));
    descriptor.insert(
        "query".into(),
        pairs_value(parts.uri.query().unwrap_or_default().as_bytes()),
    );

    if let Some(file) = parts.extensions.get::<UploadedFile>() {
        descriptor.insert("file".into(), file_value(file).await?);
    }

    Ok(IdempotencyKey::new(sha256_hex(canonical_json(
        &Value::Object(descriptor),
    ))))
}

/// An empty body is `{}`; JSON and form bodies contribute their parsed
/// value; anything else contributes its digest.
fn body_value(headers: &HeaderMap, body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }

    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        return pairs_value(body);
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(_) => json!({ "sha256": sha256_hex(body) }),
    }
}

fn params_value(params: &[(String, String)]) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
            .collect(),
    )
}

/// A name seen once maps to a string, a repeated name to the list of its
/// values in order of appearance.
fn pairs_value(encoded: &[u8]) -> Value {
    let mut map = Map::new();
    for (name, value) in url::form_urlencoded::parse(encoded) {
        let value = Value::from(value.into_owned());
        match map.get_mut(name.as_ref()) {
            None => {
                map.insert(name.into_owned(), value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    Value::Object(map)
}

async fn file_value(file: &UploadedFile) -> Result<Value> {
    let mut value = json!({
        "originalName": file.original_name,
        "size": file.size,
        "mimetype": file.mimetype,
    });

    let exists = tokio::fs::try_exists(&file.path).await.map_err(|err| {
        Error::io(format!(
            "cannot inspect upload {}: {err}",
            file.path.display()
        ))
    })?;
    if !exists {
        return Ok(value);
    }

    match hash_file(&file.path).await {
        Ok(digest) => value["contentHash"] = Value::from(digest),
        Err(err) => {
            tracing::warn!(
                path = %file.path.display(),
                error = %err,
                "Upload could not be hashed, keying on metadata only"
            );
            value["error"] = Value::from("hash_failed");
        }
    }
    Ok(value)
}

async fn hash_file(path: &std::path::Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
