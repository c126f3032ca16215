//! Request handling middleware: payload limits and request ids.

use super::router::FluentRouter;
use crate::HttpMiddleware;

use {
    crate::utils::RequestIdGenerator,
    http::HeaderName,
    tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
};

#[cfg(feature = "payload-limit")]
use {axum::extract::DefaultBodyLimit, tower_http::limit::RequestBodyLimitLayer};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Rejects request bodies larger than `http.max_payload_size_bytes` with
    /// `413 Payload Too Large`.
    ///
    /// ```toml
    /// [http]
    /// max_payload_size_bytes = "1MiB"
    /// ```
    ///
    /// The idempotency coordinator buffers bodies under its own limit, which
    /// defaults to this one.
    #[cfg(feature = "payload-limit")]
    #[must_use]
    pub fn setup_max_payload_size(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::MaxPayloadSize) {
            return self;
        }

        self.inner = self
            .inner
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(
                self.config.http.max_payload_size_bytes.as_u64() as usize,
            ));
        self
    }

    /// No-op when the `payload-limit` feature is disabled.
    #[cfg(not(feature = "payload-limit"))]
    #[must_use]
    pub fn setup_max_payload_size(self) -> Self {
        self
    }

    /// Gives every request an `x-request-id` and echoes it on the response.
    ///
    /// An id sent by the client is kept; otherwise a UUIDv7 is generated.
    #[must_use]
    pub fn setup_request_id(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::RequestId) {
            return self;
        }

        let x_request_id = HeaderName::from_static("x-request-id");
        self.inner = self
            .inner
            .layer(SetRequestIdLayer::new(
                x_request_id.clone(),
                RequestIdGenerator,
            ))
            .layer(PropagateRequestIdLayer::new(x_request_id));
        self
    }
}
