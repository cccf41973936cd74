//! Process-lifetime routing counters

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of the router's counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub total_requests: u64,
    pub local_success: u64,
    pub cloud_fallback: u64,
    pub failed: u64,
    /// Local attempts rejected by the accelerator scheduler
    pub capacity_rejections: u64,
    pub average_latency_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    metrics: RoutingMetrics,
    cumulative_latency: Duration,
}

impl Counters {
    fn record_completion(&mut self, latency: Duration) {
        self.cumulative_latency += latency;
        let completed = self.metrics.local_success + self.metrics.cloud_fallback;
        if completed > 0 {
            self.metrics.average_latency_ms =
                self.cumulative_latency.as_secs_f64() * 1000.0 / completed as f64;
        }
    }
}

/// Monotonic counters shared by every in-flight request
#[derive(Debug, Default)]
pub struct RouterMetrics {
    inner: Mutex<Counters>,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.inner.lock().metrics.total_requests += 1;
    }

    pub fn record_local_success(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.local_success += 1;
        inner.record_completion(latency);
    }

    pub fn record_cloud_fallback(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.cloud_fallback += 1;
        inner.record_completion(latency);
    }

    pub fn record_failure(&self) {
        self.inner.lock().metrics.failed += 1;
    }

    pub fn record_capacity_rejection(&self) {
        self.inner.lock().metrics.capacity_rejections += 1;
    }

    pub fn snapshot(&self) -> RoutingMetrics {
        self.inner.lock().metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_latency_over_completed_requests() {
        let metrics = RouterMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_request();
        metrics.record_local_success(Duration::from_millis(100));
        metrics.record_cloud_fallback(Duration::from_millis(300));
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.local_success, 1);
        assert_eq!(snapshot.cloud_fallback, 1);
        assert_eq!(snapshot.failed, 1);
        assert!((snapshot.average_latency_ms - 200.0).abs() < 1e-6);
    }
}
