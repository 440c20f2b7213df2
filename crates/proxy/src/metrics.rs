//! Process-wide request and lookup counters
//!
//! Counters are summarised in the log on shutdown.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics registry
pub struct MetricsRegistry {
    /// Total requests handled
    pub requests_total: Counter,
    /// Requests by response status code
    pub requests_by_status: CounterVec,
    /// Forwarded requests by backend class (or "override")
    pub requests_by_class: CounterVec,
    /// Routing-key cache hits/misses
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    /// Full-snapshot fetches issued to the registry
    pub registry_fetches: Counter,
    /// Requests answered with 404 Application not found
    pub not_found: Counter,
    /// Requests currently in flight
    pub active_requests: Gauge,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            requests_total: Counter::new(),
            requests_by_status: CounterVec::new(),
            requests_by_class: CounterVec::new(),
            cache_hits: Counter::new(),
            cache_misses: Counter::new(),
            registry_fetches: Counter::new(),
            not_found: Counter::new(),
            active_requests: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log a one-line summary of all counters
    pub fn log_summary(&self) {
        let mut by_class = self.requests_by_class.get_all();
        by_class.sort();
        let mut by_status = self.requests_by_status.get_all();
        by_status.sort();

        tracing::info!(
            uptime_secs = self.uptime().as_secs(),
            requests = self.requests_total.get(),
            cache_hits = self.cache_hits.get(),
            cache_misses = self.cache_misses.get(),
            registry_fetches = self.registry_fetches.get(),
            not_found = self.not_found.get(),
            by_class = ?by_class,
            by_status = ?by_status,
            "Request counters"
        );
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple atomic counter
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter with labels
pub struct CounterVec {
    values: RwLock<HashMap<String, u64>>,
}

impl CounterVec {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn inc(&self, label: &str) {
        let mut values = self.values.write();
        *values.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u64 {
        self.values.read().get(label).copied().unwrap_or(0)
    }

    pub fn get_all(&self) -> Vec<(String, u64)> {
        self.values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

impl Default for CounterVec {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge that can go up and down
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturate at zero
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get the global metrics registry
pub fn metrics() -> &'static Arc<MetricsRegistry> {
    &METRICS
}

/// Wait for in-flight requests to drain (with timeout)
/// Returns true if all requests finished, false if timeout
pub fn wait_for_connections_drain(timeout: Duration) -> bool {
    let start = Instant::now();
    let check_interval = Duration::from_millis(100);

    loop {
        let active = metrics().active_requests.get();
        if active == 0 {
            return true;
        }

        if start.elapsed() >= timeout {
            tracing::warn!(
                active_requests = active,
                "Grace period expired with requests in flight"
            );
            return false;
        }

        std::thread::sleep(check_interval);
    }
}

/// Tracks one in-flight request on the active gauge
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn new() -> Self {
        metrics().active_requests.inc();
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        metrics().active_requests.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_counter_vec() {
        let counter = CounterVec::new();
        counter.inc("static");
        counter.inc("static");
        counter.inc("dynamic");
        assert_eq!(counter.get("static"), 2);
        assert_eq!(counter.get("dynamic"), 1);
        assert_eq!(counter.get("serverless"), 0);
        assert_eq!(counter.get_all().len(), 2);
    }

    #[test]
    fn test_gauge_saturates() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.inc();
        assert_eq!(gauge.get(), 2);
        gauge.dec();
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_registry_starts_idle() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.active_requests.get(), 0);
        assert!(registry.uptime() < Duration::from_secs(60));
    }
}
