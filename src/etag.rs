//! Content-derived ETags for read responses.
//!
//! A successful GET or HEAD response with a textual or JSON body is buffered,
//! tagged with a weak validator over the exact bytes being sent, and answered
//! with `304 Not Modified` when the request's `If-None-Match` already names
//! that tag.

use {
    crate::{config::HttpETagConfig, fingerprint::weak_etag},
    axum::{
        body::Body,
        extract::Request,
        response::{IntoResponse, Response},
    },
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    },
    http_body_util::BodyExt,
    std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll},
    },
    tower::{Layer, Service},
};

/// Layer tagging read responses.
#[derive(Debug, Clone)]
pub struct ETagLayer {
    cache_control: HeaderValue,
    tag_length: usize,
}

impl ETagLayer {
    pub fn new(config: &HttpETagConfig) -> Self {
        Self {
            cache_control: HeaderValue::from_str(&config.cache_control)
                .unwrap_or_else(|_| HeaderValue::from_static("private, no-cache")),
            tag_length: config.tag_length,
        }
    }
}

impl Default for ETagLayer {
    fn default() -> Self {
        Self::new(&HttpETagConfig::default())
    }
}

impl<S> Layer<S> for ETagLayer {
    type Service = ETagService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ETagService {
            inner,
            cache_control: self.cache_control.clone(),
            tag_length: self.tag_length,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ETagService<S> {
    inner: S,
    cache_control: HeaderValue,
    tag_length: usize,
}

impl<S> Service<Request> for ETagService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let applies = matches!(*req.method(), Method::GET | Method::HEAD);
        let if_none_match = req.headers().get(IF_NONE_MATCH).cloned();
        let future = self.inner.call(req);
        let cache_control = self.cache_control.clone();
        let tag_length = self.tag_length;

        Box::pin(async move {
            let response = future.await?;
            if !applies || response.status() != StatusCode::OK || !is_taggable(response.headers())
            {
                return Ok(response);
            }

            let (mut parts, body) = response.into_parts();
            let bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    tracing::error!(error = %err, "Response body failed while computing ETag");
                    return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
                }
            };

            let tag = weak_etag(&bytes, tag_length);
            let Ok(tag_value) = HeaderValue::from_str(&tag) else {
                return Ok(Response::from_parts(parts, Body::from(bytes)));
            };

            if if_none_match
                .as_ref()
                .and_then(|v| v.to_str().ok())
                .is_some_and(|candidates| matches_any(candidates, &tag))
            {
                tracing::trace!(etag = %tag, "Client copy is current, sending 304");
                let mut not_modified = Response::new(Body::empty());
                *not_modified.status_mut() = StatusCode::NOT_MODIFIED;
                let headers = not_modified.headers_mut();
                headers.insert(ETAG, tag_value);
                headers.insert(CACHE_CONTROL, cache_control);
                return Ok(not_modified);
            }

            parts.headers.remove(CONTENT_LENGTH);
            parts.headers.insert(ETAG, tag_value);
            parts.headers.insert(CACHE_CONTROL, cache_control);
            Ok(Response::from_parts(parts, Body::from(bytes)))
        })
    }
}

/// JSON (including `+json` suffixes) and `text/*` bodies are tagged. A
/// response without a content type is left alone.
fn is_taggable(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/") || essence == "application/json" || essence.ends_with("+json")
}

/// Weak comparison of `tag` against an `If-None-Match` list.
fn matches_any(candidates: &str, tag: &str) -> bool {
    let opaque = |t: &str| t.trim().trim_start_matches("W/").to_owned();
    let wanted = opaque(tag);
    candidates
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || opaque(candidate) == wanted)
}
