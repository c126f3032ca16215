//! Idempotency coordinator.
//!
//! Mutating requests sharing a key run their handler at most once while the
//! captured response is valid. Later requests with the key get the captured
//! response replayed; concurrent duplicates wait for the running one.
//!
//! - [`key`]: header extraction and key derivation
//! - [`store`]: the [`IdempotencyStore`] trait and its in-memory implementation
//! - [`IdempotencyLayer`]: the tower middleware
//! - [`spawn_sweeper`]: periodic removal of expired state

pub mod key;
mod layer;
pub mod store;
mod sweeper;

pub use key::{IDEMPOTENCY_KEY, IdempotencyKey, UploadedFile, X_IDEMPOTENCY_KEY};
pub use layer::{IdempotencyLayer, IdempotencyService};
pub use store::{
    CachedResponse, Claim, IdempotencyStats, IdempotencyStore, InFlightTicket,
    InMemoryIdempotencyStore, SweepReport,
};
pub use sweeper::spawn_sweeper;
