//! Storage for captured responses and in-flight markers.

use {
    super::key::IdempotencyKey,
    axum::{
        body::{Body, Bytes},
        response::Response,
    },
    dashmap::{DashMap, mapref::entry::Entry},
    http::{HeaderMap, StatusCode, header},
    serde::Serialize,
    std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    },
    tokio::sync::watch,
};

/// A final response captured from the first execution for a key.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Captures a response, leaving out connection-level headers and the
    /// idempotency echo header, both of which are produced per delivery.
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let mut kept = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            if !is_per_delivery_header(name) {
                kept.append(name.clone(), value.clone());
            }
        }
        Self {
            status,
            headers: kept,
            body,
        }
    }

    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

fn is_per_delivery_header(name: &http::HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::TE
        || name == header::TRAILER
        || name == header::PROXY_AUTHENTICATE
        || name == header::CONTENT_LENGTH
        || name == "keep-alive"
        || name == "proxy-connection"
        || name == super::key::X_IDEMPOTENCY_KEY
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    response: CachedResponse,
    expires_at: Instant,
}

impl IdempotencyRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Proof of a successful [`IdempotencyStore::try_begin`]. Only the holder of
/// the ticket releases the marker it created.
#[derive(Debug, PartialEq, Eq)]
pub struct InFlightTicket(u64);

/// Outcome of trying to claim a key for execution.
#[derive(Debug)]
pub enum Claim {
    /// The caller owns the key and must execute, then release.
    Acquired(InFlightTicket),
    /// Another execution holds the key. The receiver closes when its marker
    /// is released.
    Busy(watch::Receiver<()>),
}

struct InFlightMarker {
    id: u64,
    started_at: Instant,
    // Dropping the marker closes every waiter's receiver.
    done: watch::Sender<()>,
}

/// Counts exposed for monitoring. Keys themselves are never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdempotencyStats {
    /// Records held, including expired ones not yet swept.
    pub size: usize,
    /// Records still valid.
    pub active_keys: usize,
    /// Keys currently executing.
    pub in_flight: usize,
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_records: usize,
    pub stale_markers: usize,
}

/// Backing store of the idempotency coordinator.
///
/// Holds two tables: captured responses by key and in-flight markers by key.
/// Every method is synchronous and must not block for long, since it runs
/// on the request path.
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Returns the valid record for `key`, removing it if it has expired.
    fn get(&self, key: &IdempotencyKey) -> Option<CachedResponse>;

    /// Stores `response` for `ttl`. A still-valid record for the key is
    /// kept as is; records are immutable until they expire.
    fn set(&self, key: &IdempotencyKey, response: CachedResponse, ttl: Duration);

    /// Removes the record for `key`. Returns whether one existed.
    fn delete(&self, key: &IdempotencyKey) -> bool;

    /// Atomically claims `key` for execution.
    fn try_begin(&self, key: &IdempotencyKey) -> Claim;

    /// Removes the marker created with `ticket`. A marker that has been
    /// replaced since is left alone.
    fn release(&self, key: &IdempotencyKey, ticket: InFlightTicket);

    /// Removes expired records and markers older than `stale_after`.
    fn sweep(&self, stale_after: Duration) -> SweepReport;

    /// Drops every record and marker.
    fn clear(&self);

    fn stats(&self) -> IdempotencyStats;
}

/// Process-local store on two `DashMap`s. Contents do not survive a restart.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<DashMap<IdempotencyKey, IdempotencyRecord>>,
    in_flight: Arc<DashMap<IdempotencyKey, InFlightMarker>>,
    next_ticket: Arc<AtomicU64>,
    max_entries: usize,
}

impl InMemoryIdempotencyStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            next_ticket: Arc::new(AtomicU64::new(1)),
            max_entries: max_entries.max(1),
        }
    }

    /// Makes room for one more record: expired records go first, then the
    /// one closest to expiry.
    fn make_room(&self, now: Instant) {
        if self.records.len() < self.max_entries {
            return;
        }
        self.records.retain(|_, record| !record.is_expired(now));

        while self.records.len() >= self.max_entries {
            let Some(victim) = self
                .records
                .iter()
                .min_by_key(|entry| entry.expires_at)
                .map(|entry| entry.key().clone())
            else {
                break;
            };
            self.records.remove(&victim);
            tracing::debug!(key = %victim.short(), "Evicted idempotency record at capacity");
        }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get(&self, key: &IdempotencyKey) -> Option<CachedResponse> {
        let now = Instant::now();
        let expired = match self.records.get(key) {
            Some(record) if !record.is_expired(now) => return Some(record.response.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.records.remove_if(key, |_, record| record.is_expired(now));
        }
        None
    }

    fn set(&self, key: &IdempotencyKey, response: CachedResponse, ttl: Duration) {
        let now = Instant::now();
        let record = IdempotencyRecord {
            response,
            expires_at: now + ttl,
        };

        if !self.records.contains_key(key) {
            self.make_room(now);
        }

        match self.records.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired(now) {
                    existing.insert(record);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    fn delete(&self, key: &IdempotencyKey) -> bool {
        self.records.remove(key).is_some()
    }

    fn try_begin(&self, key: &IdempotencyKey) -> Claim {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(marker) => Claim::Busy(marker.get().done.subscribe()),
            Entry::Vacant(slot) => {
                let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (done, _) = watch::channel(());
                slot.insert(InFlightMarker {
                    id,
                    started_at: Instant::now(),
                    done,
                });
                Claim::Acquired(InFlightTicket(id))
            }
        }
    }

    fn release(&self, key: &IdempotencyKey, ticket: InFlightTicket) {
        self.in_flight
            .remove_if(key, |_, marker| marker.id == ticket.0);
    }

    fn sweep(&self, stale_after: Duration) -> SweepReport {
        let now = Instant::now();

        let records_before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let markers_before = self.in_flight.len();
        self.in_flight
            .retain(|_, marker| now.duration_since(marker.started_at) < stale_after);

        SweepReport {
            expired_records: records_before.saturating_sub(self.records.len()),
            stale_markers: markers_before.saturating_sub(self.in_flight.len()),
        }
    }

    fn clear(&self) {
        self.records.clear();
        self.in_flight.clear();
    }

    fn stats(&self) -> IdempotencyStats {
        let now = Instant::now();
        IdempotencyStats {
            size: self.records.len(),
            active_keys: self
                .records
                .iter()
                .filter(|record| !record.is_expired(now))
                .count(),
            in_flight: self.in_flight.len(),
        }
    }
}
