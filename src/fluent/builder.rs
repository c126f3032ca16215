//! Orchestration and router delegation: setup_middleware(), start(), layer(), route(), etc.

use super::router::FluentRouter;
use super::shutdown::{ShutdownPhase, wait_for_signal};
use crate::Result;

use {
    axum::{Router, body::Body, routing::Route},
    http::Request,
    std::{convert::Infallible, net::SocketAddr},
    tower::{Layer, Service},
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Installs the configured middleware stack around the routes added so far.
    ///
    /// Layers are added innermost first, so the last one listed runs first
    /// on an incoming request:
    ///
    /// 1. ETag tagging of read responses
    /// 2. Idempotency coordinator (mutating methods only)
    /// 3. Body size limit
    /// 4. Request logging
    /// 5. Readiness probe
    /// 6. Request timeout
    /// 7. Request id
    /// 8. Liveness probe
    /// 9. Panic recovery
    ///
    /// Add every application route before calling this; `axum` layers only
    /// wrap routes that already exist. Individual layers can be excluded:
    ///
    /// ```toml
    /// [http]
    /// exclude = ["etag", "timeout"]
    /// ```
    pub async fn setup_middleware(self) -> Result<Self> {
        const PACKAGE_NAME: &str = env!("CARGO_PKG_NAME");
        const VERSION: &str = env!("CARGO_PKG_VERSION");
        tracing::info!("Starting {PACKAGE_NAME} version {VERSION}...");

        let router = self
            .setup_etag()
            .setup_idempotency()
            .setup_max_payload_size()
            .setup_logging()
            .setup_readiness()
            .setup_timeout()
            .setup_request_id()
            .setup_liveness()
            .setup_catch_panic();

        Ok(router)
    }

    /// Binds `http.bind_addr:http.bind_port` and serves until a shutdown
    /// signal arrives.
    ///
    /// After the signal, in-flight requests get `http.shutdown_timeout` to
    /// finish; [`ShutdownPhase::GracePeriodEnded`] is emitted if they do not.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when binding or serving fails.
    pub async fn start(self) -> Result<()> {
        let bind_addr = self.config.http.full_bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        tracing::info!("Bound to {}", listener.local_addr()?);
        tracing::info!("Waiting for connections");

        let shutdown_timeout = self.config.http.shutdown_timeout;
        let notifier = self.shutdown_notifier.clone();
        let mut shutdown_rx = notifier.subscribe();

        let service = self
            .inner
            .with_state(self.state)
            .into_make_service_with_connect_info::<SocketAddr>();

        let serve_future = axum::serve(listener, service)
            .with_graceful_shutdown(wait_for_signal(shutdown_timeout, notifier.clone()));

        // The grace period only starts counting once shutdown is initiated.
        tokio::select! {
            result = serve_future => {
                tracing::info!("Graceful shutdown completed");
                result?;
            }
            _ = async {
                loop {
                    match shutdown_rx.recv().await {
                        Ok(ShutdownPhase::Initiated) => break,
                        Ok(_) => continue,
                        Err(_) => return,
                    }
                }
                tokio::time::sleep(shutdown_timeout).await;
            } => {
                tracing::warn!("Graceful shutdown timeout expired, forcing shutdown");
                notifier.emit(ShutdownPhase::GracePeriodEnded);
            }
        }

        Ok(())
    }

    /// Forwards to `axum::Router::layer()`.
    #[must_use]
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request<Body>> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request<Body>>>::Response: axum::response::IntoResponse + 'static,
        <L::Service as Service<Request<Body>>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        self.inner = self.inner.layer(layer);
        self
    }

    /// Adds a route at `path`.
    ///
    /// ```
    /// use supplygraph_edge::{Config, FluentRouter};
    /// use axum::routing::get;
    ///
    /// let router = FluentRouter::without_state(Config::default())
    ///     .unwrap()
    ///     .route("/api/companies", get(|| async { "[]" }))
    ///     .into_inner();
    /// ```
    #[must_use]
    pub fn route(mut self, path: &str, route: axum::routing::MethodRouter<State>) -> Self {
        self.inner = self.inner.route(path, route);
        self
    }

    /// Forwards to `axum::Router::route_layer()`.
    #[must_use]
    pub fn route_layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request<Body>> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request<Body>>>::Response: axum::response::IntoResponse + 'static,
        <L::Service as Service<Request<Body>>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        self.inner = self.inner.route_layer(layer);
        self
    }

    #[must_use]
    pub fn nest(mut self, path: &str, router: Router<State>) -> Self {
        self.inner = self.inner.nest(path, router);
        self
    }

    #[must_use]
    pub fn nest_service<T>(mut self, path: &str, service: T) -> Self
    where
        T: Service<Request<Body>, Response = axum::response::Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        T::Future: Send + 'static,
    {
        self.inner = self.inner.nest_service(path, service);
        self
    }

    #[must_use]
    pub fn merge(mut self, other: Router<State>) -> Self {
        self.inner = self.inner.merge(other);
        self
    }

    #[must_use]
    pub fn route_service<T>(mut self, path: &str, service: T) -> Self
    where
        T: Service<Request<Body>, Response = axum::response::Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        T::Future: Send + 'static,
    {
        self.inner = self.inner.route_service(path, service);
        self
    }

    /// Unwraps the underlying router. The idempotency sweeper owned by this
    /// `FluentRouter` stops here; stored entries still expire on lookup.
    pub fn into_inner(self) -> Router<State> {
        self.inner
    }
}
