use {
    crate::{Error, Result},
    serde::Deserialize,
    std::time::Duration,
};

/// Configuration of the idempotency coordinator.
///
/// Mutating requests (POST, PUT, PATCH) are keyed either by the client's
/// `Idempotency-Key` / `X-Idempotency-Key` header or by a SHA-256 fingerprint
/// of the request. The first response for a key is cached for `ttl` and
/// replayed to every later request with the same key. Duplicates that arrive
/// while the first execution is running wait up to `in_flight_wait` for it.
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
#[derive(Debug, Clone, Deserialize)]
pub struct HttpIdempotencyConfig {
    /// How long a captured response stays valid. Default: 24 hours.
    #[serde(
        default = "HttpIdempotencyConfig::default_ttl",
        with = "humantime_serde"
    )]
    pub ttl: Duration,

    /// Reject mutating requests that carry no idempotency key header with a
    /// 400. Default: false (derive a key instead).
    #[serde(default)]
    pub require_header: bool,

    /// Upper bound on how long a duplicate waits for the in-flight original
    /// before executing on its own. Default: 5 seconds.
    #[serde(
        default = "HttpIdempotencyConfig::default_in_flight_wait",
        with = "humantime_serde"
    )]
    pub in_flight_wait: Duration,

    /// Period of the background sweep. Default: 5 minutes.
    #[serde(
        default = "HttpIdempotencyConfig::default_sweep_interval",
        with = "humantime_serde"
    )]
    pub sweep_interval: Duration,

    /// Age after which an in-flight marker counts as abandoned. Default: 5 minutes.
    #[serde(
        default = "HttpIdempotencyConfig::default_stale_after",
        with = "humantime_serde"
    )]
    pub stale_after: Duration,

    /// Maximum number of cached responses. Default: 10000.
    #[serde(default = "HttpIdempotencyConfig::default_max_entries")]
    pub max_entries: usize,

    /// Largest request body buffered for key derivation. Defaults to the
    /// server's `max_payload_size_bytes` when unset.
    #[serde(default)]
    pub max_body_bytes: Option<byte_unit::Byte>,

    /// When set, a GET route at this path serves the cache statistics.
    #[serde(default)]
    pub stats_route: Option<String>,
}

impl HttpIdempotencyConfig {
    fn default_ttl() -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn default_in_flight_wait() -> Duration {
        Duration::from_secs(5)
    }

    fn default_sweep_interval() -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn default_stale_after() -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn default_max_entries() -> usize {
        10_000
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_require_header(mut self, require: bool) -> Self {
        self.require_header = require;
        self
    }

    pub fn with_in_flight_wait(mut self, wait: Duration) -> Self {
        self.in_flight_wait = wait;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: u64) -> Self {
        self.max_body_bytes = Some(byte_unit::Byte::from_u64(bytes));
        self
    }

    pub fn with_stats_route(mut self, route: &str) -> Self {
        self.stats_route = Some(route.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::config(
                "[http.idempotency] ttl must be > 0. Example: ttl = \"24h\"",
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::config(
                "[http.idempotency] sweep_interval must be > 0. Example: sweep_interval = \"5m\"",
            ));
        }
        if self.max_entries == 0 {
            return Err(Error::config(
                "[http.idempotency] max_entries must be > 0",
            ));
        }
        if let Some(route) = &self.stats_route
            && !route.starts_with('/')
        {
            return Err(Error::config(format!(
                "[http.idempotency] stats_route must start with '/', got {route:?}"
            )));
        }
        Ok(())
    }
}

impl Default for HttpIdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Self::default_ttl(),
            require_header: false,
            in_flight_wait: Self::default_in_flight_wait(),
            sweep_interval: Self::default_sweep_interval(),
            stale_after: Self::default_stale_after(),
            max_entries: Self::default_max_entries(),
            max_body_bytes: None,
            stats_route: None,
        }
    }
}
