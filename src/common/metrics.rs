//! Request metrics for a node
//!
//! Lock-free counters, gauges and a latency histogram, grouped per
//! message kind and rendered in Prometheus text format.

use crate::net::MessageKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 10] = [0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 500.0, 1000.0];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds for precision
        self.sum.fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with +Inf
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics collected by one node
#[derive(Debug)]
pub struct NodeMetrics {
    requests: [Counter; MessageKind::ALL.len()],
    errors: [Counter; MessageKind::ALL.len()],
    pub latency: Histogram,
    pub bytes_read: Counter,
    pub bytes_written: Counter,
    pub active_connections: Gauge,
    pub connections_total: Counter,
    start_time: Instant,
}

/// Point-in-time copy of the node metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub requests_by_kind: Vec<(String, u64)>,
    pub active_connections: u64,
    pub connections_total: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub uptime_secs: u64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self {
            requests: Default::default(),
            errors: Default::default(),
            latency: Histogram::new(),
            bytes_read: Counter::new(),
            bytes_written: Counter::new(),
            active_connections: Gauge::new(),
            connections_total: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one handled request
    pub fn record_request(&self, kind: MessageKind, duration: Duration, success: bool) {
        let idx = kind.index();
        self.requests[idx].inc();
        if !success {
            self.errors[idx].inc();
        }
        self.latency.observe(duration.as_secs_f64() * 1000.0);
    }

    pub fn requests(&self, kind: MessageKind) -> u64 {
        self.requests[kind.index()].get()
    }

    pub fn errors(&self, kind: MessageKind) -> u64 {
        self.errors[kind.index()].get()
    }

    pub fn requests_total(&self) -> u64 {
        self.requests.iter().map(Counter::get).sum()
    }

    pub fn errors_total(&self) -> u64 {
        self.errors.iter().map(Counter::get).sum()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total(),
            errors_total: self.errors_total(),
            requests_by_kind: MessageKind::ALL
                .iter()
                .map(|kind| (kind.as_str().to_string(), self.requests(*kind)))
                .collect(),
            active_connections: self.active_connections.get(),
            connections_total: self.connections_total.get(),
            bytes_read: self.bytes_read.get(),
            bytes_written: self.bytes_written.get(),
            uptime_secs: self.uptime_seconds(),
        }
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        out.push_str("# HELP keeldb_requests_total Requests handled per message kind\n");
        out.push_str("# TYPE keeldb_requests_total counter\n");
        for kind in MessageKind::ALL {
            let _ = writeln!(
                out,
                "keeldb_requests_total{{kind=\"{}\"}} {}",
                kind.as_str(),
                self.requests(kind)
            );
        }

        out.push_str("# HELP keeldb_errors_total Failed requests per message kind\n");
        out.push_str("# TYPE keeldb_errors_total counter\n");
        for kind in MessageKind::ALL {
            let _ = writeln!(
                out,
                "keeldb_errors_total{{kind=\"{}\"}} {}",
                kind.as_str(),
                self.errors(kind)
            );
        }

        out.push_str("# HELP keeldb_active_connections Current active connections\n");
        out.push_str("# TYPE keeldb_active_connections gauge\n");
        let _ = writeln!(out, "keeldb_active_connections {}", self.active_connections.get());

        out.push_str("# HELP keeldb_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE keeldb_request_duration_ms histogram\n");
        for (le, count) in self.latency.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(out, "keeldb_request_duration_ms_bucket{{le=\"+Inf\"}} {}", count);
            } else {
                let _ = writeln!(out, "keeldb_request_duration_ms_bucket{{le=\"{}\"}} {}", le, count);
            }
        }
        let _ = writeln!(out, "keeldb_request_duration_ms_sum {}", self.latency.sum());
        let _ = writeln!(out, "keeldb_request_duration_ms_count {}", self.latency.count());

        out
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(0.05);
        hist.observe(7.0);
        hist.observe(5000.0);

        assert_eq!(hist.count(), 3);

        let buckets = hist.get_buckets();
        assert_eq!(buckets.first().unwrap().1, 1);
        assert_eq!(buckets.last().unwrap().1, 3);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_node_metrics() {
        let metrics = NodeMetrics::new();

        metrics.record_request(MessageKind::Insert, Duration::from_millis(2), true);
        metrics.record_request(MessageKind::Insert, Duration::from_millis(3), false);
        metrics.record_request(MessageKind::Query, Duration::from_millis(1), true);

        assert_eq!(metrics.requests(MessageKind::Insert), 2);
        assert_eq!(metrics.errors(MessageKind::Insert), 1);
        assert_eq!(metrics.requests_total(), 3);
        assert_eq!(metrics.errors_total(), 1);

        let text = metrics.to_prometheus();
        assert!(text.contains("keeldb_requests_total{kind=\"insert\"} 2"));
        assert!(text.contains("keeldb_errors_total{kind=\"query\"} 0"));
    }
}
