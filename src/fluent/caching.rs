//! Response caching middleware: the idempotency coordinator and ETags.

use super::router::FluentRouter;
use crate::HttpMiddleware;

use {
    crate::{
        ETagLayer, IdempotencyLayer, IdempotencyStats, IdempotencyStore, InMemoryIdempotencyStore,
        idempotency::spawn_sweeper,
    },
    axum::{Json, routing::get},
    std::sync::Arc,
};

impl<State> FluentRouter<State>
where
    State: Clone + Send + Sync + 'static,
{
    /// Sets up the idempotency coordinator.
    ///
    /// POST, PUT and PATCH requests sharing an idempotency key run
    /// their handler at most once per TTL window; repeats receive the stored
    /// response. The key comes from the `Idempotency-Key` (or
    /// `X-Idempotency-Key`) header, or is derived from the method, path and
    /// body when the client sends none.
    ///
    /// # Configuration
    ///
    /// ```toml
    /// [http.idempotency]
    /// ttl = "24h"
    /// require_header = false
    /// in_flight_wait = "5s"
    /// sweep_interval = "5m"
    /// stale_after = "5m"
    /// max_entries = 10000
    /// stats_route = "/api/idempotency/stats"
    /// ```
    ///
    /// Without an `[http.idempotency]` section this is a no-op.
    ///
    /// The sweeper is stopped when shutdown is initiated, when
    /// [`FluentRouter::stop_idempotency_sweeper`] is called, or when the
    /// router is dropped.
    #[must_use]
    pub fn setup_idempotency(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::Idempotency) {
            return self;
        }
        let Some(config) = self.config.http.idempotency.clone() else {
            return self;
        };

        let store = self
            .idempotency_store
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryIdempotencyStore::new(config.max_entries)));
        self.idempotency_store = Some(store.clone());

        self.sweeper_handle = Some(spawn_sweeper(
            store.clone(),
            config.sweep_interval,
            config.stale_after,
            self.cancellation_token(),
        ));

        if let Some(route) = &config.stats_route {
            let stats_store = store.clone();
            self.inner = self.inner.route(
                route,
                get(move || {
                    let store = stats_store.clone();
                    async move { Json(store.stats()) }
                }),
            );
        }

        let body_limit = self.config.http.idempotency_body_limit();
        tracing::debug!(
            ttl_secs = config.ttl.as_secs(),
            require_header = config.require_header,
            body_limit,
            "Idempotency coordinator enabled"
        );
        self.inner = self
            .inner
            .layer(IdempotencyLayer::with_store(&config, body_limit, store));
        self
    }

    /// Sets up weak ETags on successful GET and HEAD responses, answering
    /// `304 Not Modified` when `If-None-Match` already names the tag.
    ///
    /// # Configuration
    ///
    /// ```toml
    /// [http.etag]
    /// cache_control = "private, no-cache"
    /// tag_length = 16
    /// ```
    ///
    /// Without an `[http.etag]` section this is a no-op.
    #[must_use]
    pub fn setup_etag(mut self) -> Self {
        if !self.is_middleware_enabled(HttpMiddleware::ETag) {
            return self;
        }
        if let Some(config) = &self.config.http.etag {
            self.inner = self.inner.layer(ETagLayer::new(config));
        }
        self
    }

    /// The store used by the idempotency coordinator, if one was set up or injected.
    pub fn idempotency_store(&self) -> Option<Arc<dyn IdempotencyStore>> {
        self.idempotency_store.clone()
    }

    /// Current counters of the idempotency store.
    pub fn idempotency_stats(&self) -> Option<IdempotencyStats> {
        self.idempotency_store.as_ref().map(|store| store.stats())
    }

    /// Drops every stored response and in-flight marker.
    pub fn clear_idempotency_cache(&self) {
        if let Some(store) = &self.idempotency_store {
            store.clear();
            tracing::info!("Idempotency cache cleared");
        }
    }

    /// Stops the periodic sweep. Stored entries still expire on lookup.
    pub fn stop_idempotency_sweeper(&mut self) {
        if self.sweeper_handle.take().is_some() {
            tracing::debug!("Idempotency sweeper stopped");
        }
    }
}
