//! Request metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pawcache::format_bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Default)]
struct ResponseTime {
    samples: u64,
    average_ms: f64,
}

/// Process-lifetime request counters
#[derive(Debug, Default)]
pub struct RequestMetrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    debounced: AtomicU64,
    throttled: AtomicU64,
    batched: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    bytes_transferred: AtomicU64,
    response_time: Mutex<ResponseTime>,
}

/// Point-in-time copy of the request metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizerStats {
    /// Cached requests issued
    pub total_requests: u64,
    /// Requests served from cache
    pub cache_hits: u64,
    /// Debounced executions
    pub debounced_calls: u64,
    /// Throttled executions
    pub throttled_calls: u64,
    /// Calls answered through a batch
    pub batched_requests: u64,
    /// Retries performed
    pub retried_requests: u64,
    /// Requests that ended in an error
    pub failed_requests: u64,
    /// Mean network latency
    pub average_response_time_ms: f64,
    /// Approximate response volume (JSON length)
    pub bytes_transferred: u64,
    /// `cache_hits / total_requests` as a percentage
    pub hit_rate_percent: f64,
}

impl RequestMetrics {
    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_debounced(&self) {
        self.debounced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batched(&self, calls: u64) {
        self.batched.fetch_add(calls, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one network response into the latency mean and byte count
    pub(crate) fn record_response(&self, elapsed: Duration, body: &Value) {
        let bytes = pawcache::json_size(body).unwrap_or(0);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);

        let sample = elapsed.as_secs_f64() * 1000.0;
        let mut timing = self.response_time.lock();
        timing.samples += 1;
        timing.average_ms += (sample - timing.average_ms) / timing.samples as f64;
    }

    /// Copy the counters
    pub fn snapshot(&self) -> OptimizerStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let hit_rate_percent = if total_requests == 0 {
            0.0
        } else {
            cache_hits as f64 / total_requests as f64 * 100.0
        };

        OptimizerStats {
            total_requests,
            cache_hits,
            debounced_calls: self.debounced.load(Ordering::Relaxed),
            throttled_calls: self.throttled.load(Ordering::Relaxed),
            batched_requests: self.batched.load(Ordering::Relaxed),
            retried_requests: self.retried.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            average_response_time_ms: self.response_time.lock().average_ms,
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            hit_rate_percent,
        }
    }
}

impl OptimizerStats {
    /// Write a summary to the log
    pub fn log(&self) {
        info!(
            "API stats: {} requests, {} cache hits ({:.2}%), avg {:.0}ms",
            self.total_requests,
            self.cache_hits,
            self.hit_rate_percent,
            self.average_response_time_ms
        );
        info!(
            "API stats: debounced {}, throttled {}, batched {}, retried {}, failed {}, transferred {}",
            self.debounced_calls,
            self.throttled_calls,
            self.batched_requests,
            self.retried_requests,
            self.failed_requests,
            format_bytes(self.bytes_transferred)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_incremental_mean() {
        let metrics = RequestMetrics::default();
        metrics.record_response(Duration::from_millis(100), &json!(null));
        metrics.record_response(Duration::from_millis(200), &json!(null));
        metrics.record_response(Duration::from_millis(600), &json!(null));

        let stats = metrics.snapshot();
        assert!((stats.average_response_time_ms - 300.0).abs() < 1e-6);
    }

    #[test]
    fn test_bytes_use_json_length() {
        let metrics = RequestMetrics::default();
        metrics.record_response(Duration::ZERO, &json!({"a": 1}));

        assert_eq!(metrics.snapshot().bytes_transferred, 7);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = RequestMetrics::default();
        assert_eq!(metrics.snapshot().hit_rate_percent, 0.0);

        for _ in 0..4 {
            metrics.record_request();
        }
        metrics.record_hit();
        assert_eq!(metrics.snapshot().hit_rate_percent, 25.0);
    }
}
