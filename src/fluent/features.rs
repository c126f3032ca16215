//! Probe endpoints and request timeouts.

use super::router::FluentRouter;
use crate::HttpMiddleware;

use {
    axum::routing::get,
    http::StatusCode,
    tower_http::timeout::TimeoutLayer,
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Sets up request timeout middleware.
    ///
    /// Requests running longer than `http.request_timeout` are answered with
    /// `408 Request Timeout`. The handler future is dropped, which also
    /// releases any idempotency marker it held.
    ///
    /// ```toml
    /// [http]
    /// request_timeout = "30s"
    /// ```
    #[must_use]
    pub fn setup_timeout(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Timeout) {
            return self;
        }

        if let Some(timeout) = self.config.http.request_timeout {
            self.inner = self.inner.layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                timeout,
            ));
        }
        self
    }

    /// Adds the liveness probe at `http.liveness_route` (default `/live`).
    ///
    /// Installed near the outside of the stack so the probe answers even
    /// when inner layers would reject or delay the request.
    #[must_use]
    pub fn setup_liveness(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Liveness) {
            return self;
        }

        let route = self.config.http.liveness_route.clone();
        self.inner = self.inner.route(&route, get(|| async { "OK\n" }));
        self
    }

    /// Adds the readiness probe at `http.readiness_route` (default `/ready`).
    ///
    /// Reports `503 Service Unavailable` once shutdown has been initiated so
    /// load balancers stop routing new work here while requests drain.
    #[must_use]
    pub fn setup_readiness(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Readiness) {
            return self;
        }

        let route = self.config.http.readiness_route.clone();
        let token = self.cancellation_token();
        self.inner = self.inner.route(
            &route,
            get(move || {
                let shutting_down = token.is_cancelled();
                async move {
                    if shutting_down {
                        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down\n")
                    } else {
                        (StatusCode::OK, "OK\n")
                    }
                }
            }),
        );
        self
    }
}
