//! FluentRouter and middleware configuration.
//!
//! - [`router`] - Core `FluentRouter` struct and initialization
//! - [`caching`] - Idempotency coordinator and ETags
//! - [`observability`] - Request logging
//! - [`request`] - Payload limits and request ids
//! - [`features`] - Probes and timeouts
//! - [`control`] - Panic recovery
//! - [`shutdown`] - Shutdown phases and notifications
//! - [`builder`] - Orchestration (setup_middleware, start, router delegation)

mod builder;
mod caching;
mod control;
mod features;
mod observability;
mod request;
mod router;
mod shutdown;

pub use router::FluentRouter;
pub use shutdown::{ShutdownNotifier, ShutdownPhase};
