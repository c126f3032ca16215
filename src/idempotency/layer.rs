//! Tower middleware running mutating requests at most once per key.

use {
    super::{
        key::{IdempotencyKey, X_IDEMPOTENCY_KEY, client_key, derive_key, is_mutating},
        store::{CachedResponse, Claim, IdempotencyStore, InFlightTicket, InMemoryIdempotencyStore},
    },
    crate::{Error, config::HttpIdempotencyConfig},
    axum::{
        body::{Body, Bytes},
        extract::{FromRequestParts, RawPathParams, Request},
        response::{IntoResponse, Response},
    },
    http::{HeaderValue, request::Parts},
    http_body_util::{BodyExt, LengthLimitError, Limited},
    std::{
        future::Future,
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
        time::Duration,
    },
    tokio::time::Instant,
    tower::{Layer, Service},
};

/// Settings of one coordinator instance.
#[derive(Debug, Clone)]
struct Options {
    ttl: Duration,
    require_header: bool,
    in_flight_wait: Duration,
    max_body_bytes: usize,
}

/// Layer installing the idempotency coordinator.
///
/// ```rust,no_run
/// use supplygraph_edge::{HttpIdempotencyConfig, IdempotencyLayer};
/// use axum::{Router, routing::post};
///
/// let layer = IdempotencyLayer::new(&HttpIdempotencyConfig::default(), 64 * 1024);
/// let app: Router = Router::new()
///     .route("/widgets", post(|| async { "created" }))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct IdempotencyLayer {
    store: Arc<dyn IdempotencyStore>,
    options: Options,
}

impl IdempotencyLayer {
    /// Creates a layer with its own in-memory store.
    pub fn new(config: &HttpIdempotencyConfig, max_body_bytes: usize) -> Self {
        let store = Arc::new(InMemoryIdempotencyStore::new(config.max_entries));
        Self::with_store(config, max_body_bytes, store)
    }

    /// Creates a layer over an existing store.
    pub fn with_store(
        config: &HttpIdempotencyConfig,
        max_body_bytes: usize,
        store: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            store,
            options: Options {
                ttl: config.ttl,
                require_header: config.require_header,
                in_flight_wait: config.in_flight_wait,
                max_body_bytes,
            },
        }
    }

    pub fn store(&self) -> Arc<dyn IdempotencyStore> {
        self.store.clone()
    }
}

impl<S> Layer<S> for IdempotencyLayer {
    type Service = IdempotencyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdempotencyService {
            inner,
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }
}

#[derive(Clone)]
pub struct IdempotencyService<S> {
    inner: S,
    store: Arc<dyn IdempotencyStore>,
    options: Options,
}

impl<S> Service<Request> for IdempotencyService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let store = self.store.clone();
        let options = self.options.clone();

        Box::pin(async move {
            if !is_mutating(req.method()) {
                let mut inner = inner;
                return inner.call(req).await;
            }
            coordinate(inner, store, options, req).await
        })
    }
}

async fn coordinate<S>(
    mut inner: S,
    store: Arc<dyn IdempotencyStore>,
    options: Options,
    req: Request,
) -> Result<Response, S::Error>
where
    S: Service<Request, Response = Response> + Send,
    S::Future: Send,
{
    let supplied = client_key(req.headers());
    if options.require_header && supplied.is_none() {
        return Ok(Error::missing_idempotency_key().into_response());
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match read_body(body, options.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => return Ok(err.into_response()),
    };

    let key = match supplied {
        Some(key) => key,
        None => {
            let params = path_params(&mut parts).await;
            match derive_key(&parts, &params, &bytes).await {
                Ok(key) => key,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "Idempotency key derivation failed, running request unprotected"
                    );
                    let req = Request::from_parts(parts, Body::from(bytes));
                    return inner.call(req).await;
                }
            }
        }
    };

    let req = Request::from_parts(parts, Body::from(bytes));
    let deadline = Instant::now() + options.in_flight_wait;

    loop {
        if let Some(cached) = store.get(&key) {
            tracing::debug!(key = %key.short(), "Replaying cached response");
            return Ok(replay(&cached, &key));
        }

        match store.try_begin(&key) {
            Claim::Acquired(ticket) => {
                let guard = InFlightGuard::new(store.clone(), key.clone(), ticket);

                // An execution may have completed between the lookup and the claim.
                if let Some(cached) = store.get(&key) {
                    drop(guard);
                    return Ok(replay(&cached, &key));
                }

                let response = inner.call(req).await?;
                let response = capture(&*store, &key, options.ttl, response).await;
                drop(guard);
                return Ok(response);
            }
            Claim::Busy(mut done) => {
                tracing::debug!(key = %key.short(), "Waiting for in-flight duplicate");
                if tokio::time::timeout_at(deadline, done.changed()).await.is_err() {
                    tracing::warn!(
                        key = %key.short(),
                        waited_ms = options.in_flight_wait.as_millis() as u64,
                        "In-flight duplicate did not finish in time, executing again"
                    );
                    // Stored like a fresh execution so later retries replay it.
                    let response = inner.call(req).await?;
                    return Ok(capture(&*store, &key, options.ttl, response).await);
                }
            }
        }
    }
}

/// Buffers the handler's response, stores it, and relays it.
async fn capture(
    store: &dyn IdempotencyStore,
    key: &IdempotencyKey,
    ttl: Duration,
    response: Response,
) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::error!(
                key = %key.short(),
                error = %err,
                "Response body failed, nothing cached"
            );
            let response = Error::internal("Response body could not be produced").into_response();
            return with_key_header(response, key);
        }
    };

    let cached = CachedResponse::capture(parts.status, &parts.headers, bytes.clone());
    store.set(key, cached, ttl);
    tracing::debug!(key = %key.short(), status = parts.status.as_u16(), "Cached response");

    let mut parts = parts;
    parts.headers.remove(http::header::CONTENT_LENGTH);
    with_key_header(Response::from_parts(parts, Body::from(bytes)), key)
}

fn replay(cached: &CachedResponse, key: &IdempotencyKey) -> Response {
    with_key_header(cached.to_response(), key)
}

fn with_key_header(mut response: Response, key: &IdempotencyKey) -> Response {
    if let Ok(value) = HeaderValue::from_str(key.as_str()) {
        response.headers_mut().insert(&X_IDEMPOTENCY_KEY, value);
    }
    response
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, Error> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(Error::payload_too_large(limit))
        }
        Err(err) => Err(Error::invalid_input(format!(
            "Failed to read request body: {err}"
        ))),
    }
}

/// Matched route parameters, empty when the request was not routed.
async fn path_params(parts: &mut Parts) -> Vec<(String, String)> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Holds a key's in-flight marker and releases it when dropped, whether the
/// request finished, failed, was cancelled or unwound from a panic.
struct InFlightGuard {
    store: Arc<dyn IdempotencyStore>,
    key: IdempotencyKey,
    ticket: Option<InFlightTicket>,
}

impl InFlightGuard {
    fn new(store: Arc<dyn IdempotencyStore>, key: IdempotencyKey, ticket: InFlightTicket) -> Self {
        Self {
            store,
            key,
            ticket: Some(ticket),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.store.release(&self.key, ticket);
        }
    }
}
