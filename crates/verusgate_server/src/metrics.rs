//! Prometheus metrics for the gateway.
//!
//! Counters are recorded where the events happen; gauges that mirror
//! external state (cache size, per-chain RPC counters) are refreshed by
//! the `/metrics` handler just before rendering.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use verusgate_cache::CacheStats;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total HTTP requests by method, matched route and status.
    pub static ref HTTP_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("verusgate_http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"]
    )
    .expect("metric creation failed");

    /// HTTP request latency.
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "verusgate_http_request_duration_seconds",
            "HTTP request latency in seconds"
        ),
        &["method", "path"]
    )
    .expect("metric creation failed");

    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "verusgate_cache_hits_total",
        "Total number of cache hits"
    )
    .expect("metric creation failed");

    pub static ref CACHE_MISSES: IntCounter = IntCounter::new(
        "verusgate_cache_misses_total",
        "Total number of cache misses"
    )
    .expect("metric creation failed");

    pub static ref CACHE_SIZE: IntGauge = IntGauge::new(
        "verusgate_cache_size_bytes",
        "Current cache size in bytes"
    )
    .expect("metric creation failed");

    pub static ref CACHE_ITEMS: IntGauge = IntGauge::new(
        "verusgate_cache_items",
        "Current number of items in the cache"
    )
    .expect("metric creation failed");

    pub static ref FILES_SERVED: IntCounter = IntCounter::new(
        "verusgate_files_served_total",
        "Total number of files served"
    )
    .expect("metric creation failed");

    pub static ref BYTES_TRANSFERRED: IntCounter = IntCounter::new(
        "verusgate_bytes_transferred_total",
        "Total number of payload bytes served"
    )
    .expect("metric creation failed");

    /// RPC requests per chain, mirrored from the client counters.
    pub static ref RPC_REQUESTS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("verusgate_rpc_requests_total", "Total RPC requests per chain"),
        &["chain"]
    )
    .expect("metric creation failed");

    pub static ref RPC_ERRORS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("verusgate_rpc_errors_total", "Total RPC errors per chain"),
        &["chain"]
    )
    .expect("metric creation failed");
}

/// Register every metric with the gateway registry.
///
/// Safe to call more than once; re-registration errors are ignored.
pub fn register() {
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_HITS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_MISSES.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_SIZE.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_ITEMS.clone()));
    let _ = REGISTRY.register(Box::new(FILES_SERVED.clone()));
    let _ = REGISTRY.register(Box::new(BYTES_TRANSFERRED.clone()));
    let _ = REGISTRY.register(Box::new(RPC_REQUESTS.clone()));
    let _ = REGISTRY.register(Box::new(RPC_ERRORS.clone()));
}

pub fn record_http_request(method: &str, path: &str, status: u16, seconds: f64) {
    HTTP_REQUESTS
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path])
        .observe(seconds);
}

pub fn record_cache_hit() {
    CACHE_HITS.inc();
}

pub fn record_cache_miss() {
    CACHE_MISSES.inc();
}

pub fn record_file_served(bytes: u64) {
    FILES_SERVED.inc();
    BYTES_TRANSFERRED.inc_by(bytes);
}

pub fn update_cache_stats(stats: &CacheStats) {
    CACHE_SIZE.set(stats.size as i64);
    CACHE_ITEMS.set(stats.items as i64);
}

pub fn update_rpc_stats(chain: &str, requests: u64, errors: u64) {
    RPC_REQUESTS.with_label_values(&[chain]).set(requests as i64);
    RPC_ERRORS.with_label_values(&[chain]).set(errors as i64);
}

/// Render the registry in Prometheus text exposition format.
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_metrics() {
        register();
        record_http_request("GET", "/health", 200, 0.001);
        record_cache_hit();
        update_cache_stats(&CacheStats {
            hits: 1,
            misses: 0,
            size: 42,
            items: 1,
            hit_rate: 1.0,
        });

        let text = encode();
        assert!(text.contains("verusgate_http_requests_total"));
        assert!(text.contains("verusgate_cache_size_bytes 42"));
    }

    #[test]
    fn register_is_idempotent() {
        register();
        register();
    }
}
