//! Request logging.

use super::router::FluentRouter;
use crate::{HttpMiddleware, idempotency::key::client_key};

use {
    axum::body::Body,
    http::Request,
    tower_http::trace::TraceLayer as TowerHTTPLayer,
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Wraps every request in an `http_request` span carrying the method,
    /// URI and request id. When the client supplied an idempotency key its
    /// first characters are recorded as `idempotency_key`.
    ///
    /// Output format follows `logging.format`; filtering follows `RUST_LOG`.
    #[must_use]
    pub fn setup_logging(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Logging) {
            return self;
        }

        self.inner = self.inner.layer(TowerHTTPLayer::new_for_http().make_span_with(
            |request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");

                let span = tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                    idempotency_key = tracing::field::Empty,
                );
                if let Some(key) = client_key(request.headers()) {
                    span.record("idempotency_key", key.short());
                }
                span
            },
        ));
        self
    }
}
