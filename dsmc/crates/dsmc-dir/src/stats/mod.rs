//! Stats Module - Protocol Monitoring
//!
//! Collects counters for the coherence protocol so a run can be inspected
//! after the fact:
//! - Messages sent per kind (requests, objects, recalls, forwards)
//! - Writebacks completed and deferred
//! - Waiter callbacks fired
//! - Fetch round-trip latency (request sent until object received)

pub mod histogram;
pub mod metrics;

pub use histogram::Histogram;
pub use metrics::{DirMetrics, MetricValue};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// DirStats - counters shared by both directories of a host
pub struct DirStats {
    requests_sent: AtomicU64,
    objects_sent: AtomicU64,
    recalls_issued: AtomicU64,
    requests_forwarded: AtomicU64,
    invalidations_sent: AtomicU64,
    writebacks: AtomicU64,
    writebacks_deferred: AtomicU64,
    notifications_fired: AtomicU64,
    messages_received: AtomicU64,
    fetch_latency: Arc<Histogram>,
    start_time: std::time::Instant,
}

impl DirStats {
    pub fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            objects_sent: AtomicU64::new(0),
            recalls_issued: AtomicU64::new(0),
            requests_forwarded: AtomicU64::new(0),
            invalidations_sent: AtomicU64::new(0),
            writebacks: AtomicU64::new(0),
            writebacks_deferred: AtomicU64::new(0),
            notifications_fired: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            fetch_latency: Arc::new(Histogram::new()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_object_sent(&self) {
        self.objects_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recall(&self) {
        self.recalls_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward(&self) {
        self.requests_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_writeback(&self) {
        self.writebacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred_writeback(&self) {
        self.writebacks_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notifications(&self, count: usize) {
        self.notifications_fired
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the time between sending a request and receiving the object
    pub fn record_fetch_latency(&self, duration: Duration) {
        self.fetch_latency.record(duration.as_nanos() as u64);
    }

    pub fn fetch_latency(&self) -> Arc<Histogram> {
        self.fetch_latency.clone()
    }

    /// Get summary statistics
    pub fn summary(&self) -> DirSummary {
        DirSummary {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            objects_sent: self.objects_sent.load(Ordering::Relaxed),
            recalls_issued: self.recalls_issued.load(Ordering::Relaxed),
            requests_forwarded: self.requests_forwarded.load(Ordering::Relaxed),
            invalidations_sent: self.invalidations_sent.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
            writebacks_deferred: self.writebacks_deferred.load(Ordering::Relaxed),
            notifications_fired: self.notifications_fired.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            fetches_completed: self.fetch_latency.count(),
            avg_fetch_us: self.fetch_latency.mean() as f64 / 1_000.0,
            max_fetch_us: self.fetch_latency.max() as f64 / 1_000.0,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export the current counters as named metrics
    pub fn metrics(&self, host: dsmc_util::HostId) -> DirMetrics {
        let summary = self.summary();
        let metrics = DirMetrics::new();
        let prefix = format!("dsmc_host{}", host);

        let counters = [
            ("requests_sent", summary.requests_sent),
            ("objects_sent", summary.objects_sent),
            ("recalls_issued", summary.recalls_issued),
            ("requests_forwarded", summary.requests_forwarded),
            ("invalidations_sent", summary.invalidations_sent),
            ("writebacks", summary.writebacks),
            ("writebacks_deferred", summary.writebacks_deferred),
            ("notifications_fired", summary.notifications_fired),
            ("messages_received", summary.messages_received),
        ];
        for (name, value) in counters {
            metrics.add(format!("{}_{}", prefix, name), MetricValue::Counter(value));
        }
        metrics.add(
            format!("{}_fetch_p99_log2ns", prefix),
            MetricValue::Histogram(self.fetch_latency.p99()),
        );
        metrics.add(
            format!("{}_fetch_avg_us", prefix),
            MetricValue::Gauge(summary.avg_fetch_us),
        );

        metrics
    }

    /// Reset statistics
    pub fn reset(&self) {
        for counter in [
            &self.requests_sent,
            &self.objects_sent,
            &self.recalls_issued,
            &self.requests_forwarded,
            &self.invalidations_sent,
            &self.writebacks,
            &self.writebacks_deferred,
            &self.notifications_fired,
            &self.messages_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.fetch_latency.clear();
    }
}

impl Default for DirStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DirSummary {
    pub requests_sent: u64,
    pub objects_sent: u64,
    pub recalls_issued: u64,
    pub requests_forwarded: u64,
    pub invalidations_sent: u64,
    pub writebacks: u64,
    pub writebacks_deferred: u64,
    pub notifications_fired: u64,
    pub messages_received: u64,
    pub fetches_completed: u64,
    /// Average fetch round trip (us)
    pub avg_fetch_us: f64,
    /// Max fetch round trip (us)
    pub max_fetch_us: f64,
    pub uptime_secs: u64,
}

impl std::fmt::Display for DirSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requests={} objects={} recalls={} forwards={} invalidations={} \
             writebacks={} deferred={} notified={} received={} fetches={} avg_fetch={:.1}us",
            self.requests_sent,
            self.objects_sent,
            self.recalls_issued,
            self.requests_forwarded,
            self.invalidations_sent,
            self.writebacks,
            self.writebacks_deferred,
            self.notifications_fired,
            self.messages_received,
            self.fetches_completed,
            self.avg_fetch_us,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsmc_util::HostId;

    #[test]
    fn test_counters_and_reset() {
        let stats = DirStats::new();
        stats.record_request_sent();
        stats.record_request_sent();
        stats.record_object_sent();
        stats.record_notifications(3);
        stats.record_fetch_latency(Duration::from_micros(10));

        let summary = stats.summary();
        assert_eq!(summary.requests_sent, 2);
        assert_eq!(summary.objects_sent, 1);
        assert_eq!(summary.notifications_fired, 3);
        assert_eq!(summary.fetches_completed, 1);

        stats.reset();
        let summary = stats.summary();
        assert_eq!(summary.requests_sent, 0);
        assert_eq!(summary.fetches_completed, 0);
    }

    #[test]
    fn test_metrics_export_names() {
        let stats = DirStats::new();
        stats.record_recall();
        let metrics = stats.metrics(HostId(2));

        let recalls = metrics.get("dsmc_host2_recalls_issued").unwrap();
        assert_eq!(recalls.as_f64(), 1.0);
        assert!(metrics.to_prometheus().contains("dsmc_host2_writebacks 0"));
    }

    #[test]
    fn test_summary_display() {
        let stats = DirStats::new();
        stats.record_writeback();
        assert!(stats.summary().to_string().contains("writebacks=1"));
    }
}
