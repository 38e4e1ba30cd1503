use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("dream_requests_total", "Total number of dream requests").unwrap();
    pub static ref RATE_LIMITED: Counter =
        register_counter!("dream_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("dream_upstream_errors_total", "Failed upstream generation calls").unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "dream_upstream_latency_seconds",
        "Upstream generation latency in seconds"
    )
    .unwrap();
    pub static ref RATE_LIMITER_ENTRIES: Gauge =
        register_gauge!("dream_rate_limiter_entries", "Client identities tracked by the rate limiter").unwrap();
}
