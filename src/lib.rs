//! # supplygraph-edge
//!
//! The HTTP edge of the supply graph API: an axum service builder whose
//! middleware stack is configured through TOML, with two response-caching
//! layers at its core.
//!
//! - **Idempotency coordinator**: POST, PUT and PATCH requests that
//!   share an idempotency key run their handler at most once while the
//!   captured response is valid. Retries and concurrent duplicates get the
//!   first response replayed, marked with `X-Idempotency-Key`.
//! - **ETags**: successful GET and HEAD responses carry a weak validator
//!   derived from the body; a matching `If-None-Match` gets `304 Not Modified`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use axum::routing::post;
//! use supplygraph_edge::{Config, FluentRouter, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default(); // Loads config/{RUST_ENV}.toml
//!     config.setup_tracing();
//!
//!     FluentRouter::without_state(config)?
//!         .route("/api/widgets", post(|| async { "created" }))
//!         .setup_middleware()
//!         .await?
//!         .start()
//!         .await
//! }
//! ```
//!
//! With `config/dev.toml`:
//!
//! ```toml
//! [http]
//! bind_port = 5000
//!
//! [http.idempotency]
//! ttl = "24h"
//!
//! [http.etag]
//! cache_control = "private, no-cache"
//! ```
//!
//! # What You Get
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | Idempotency | At-most-once mutating requests per key | `[http.idempotency]` present |
//! | ETags | Weak validators and 304 responses | `[http.etag]` present |
//! | Health probes | `/live` and `/ready` endpoints | Enabled |
//! | Request logging | Structured spans with UUIDv7 request ids | Enabled |
//! | Payload limit | 413 for oversized bodies | 32 KiB |
//! | Panic recovery | Catches panics, returns 500, keeps running | Enabled |
//! | Graceful shutdown | Handles SIGTERM, drains connections | 30s timeout |
//!
//! Middleware can be switched off individually:
//!
//! ```toml
//! [http]
//! exclude = ["etag", "catch-panic"]
//! ```
mod config;
mod error;
mod etag;
mod fluent;
mod utils;

pub mod fingerprint;
pub mod idempotency;

pub use config::*;
pub use error::*;
pub use etag::{ETagLayer, ETagService};
pub use fluent::*;
pub use idempotency::{
    CachedResponse, IdempotencyKey, IdempotencyLayer, IdempotencyService, IdempotencyStats,
    IdempotencyStore, InMemoryIdempotencyStore, UploadedFile,
};
pub use utils::*;

pub type Result<T> = std::result::Result<T, Error>;
