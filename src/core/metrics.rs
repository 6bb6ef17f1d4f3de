//! Proxy metrics collection
//!
//! Counters for synthesis requests, cache hits and per-upstream failures, plus
//! a histogram of time to first audio. One instance is created at startup and
//! shared by every connection; [`ProxyMetrics::render_prometheus`] produces
//! the text exposition served on `/metrics`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

/// Upper bounds (seconds) of the latency histogram buckets. The last bucket is +Inf.
pub const LATENCY_BUCKETS: [f64; 10] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Thread-safe metrics sink using atomic counters
#[derive(Debug)]
pub struct ProxyMetrics {
    /// Synthesis requests seen (one-shot or streaming start)
    requests_total: AtomicU64,

    /// Requests answered from the audio cache
    cache_hits_total: AtomicU64,

    /// Failure count per upstream URI
    upstream_failures: DashMap<String, AtomicU64>,

    /// Per-bucket (non-cumulative) observation counts; index LATENCY_BUCKETS.len() is +Inf
    latency_buckets: [AtomicU64; LATENCY_BUCKETS.len() + 1],

    /// Sum of observations (microseconds)
    latency_sum_us: AtomicU64,

    latency_count: AtomicU64,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            cache_hits_total: AtomicU64::new(0),
            upstream_failures: DashMap::new(),
            latency_buckets: Default::default(),
            latency_sum_us: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self, uri: &str) {
        if let Some(counter) = self.upstream_failures.get(uri) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.upstream_failures
            .entry(uri.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record time from request to first relayed audio chunk
    pub fn record_latency(&self, latency: Duration) {
        let secs = latency.as_secs_f64();
        let bucket = LATENCY_BUCKETS
            .iter()
            .position(|&bound| secs <= bound)
            .unwrap_or(LATENCY_BUCKETS.len());

        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn cache_hits_total(&self) -> u64 {
        self.cache_hits_total.load(Ordering::Relaxed)
    }

    pub fn upstream_failures(&self, uri: &str) -> u64 {
        self.upstream_failures
            .get(uri)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn latency_count(&self) -> u64 {
        self.latency_count.load(Ordering::Relaxed)
    }

    /// Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "# HELP tts_proxy_requests_total Total number of TTS synthesis requests"
        );
        let _ = writeln!(out, "# TYPE tts_proxy_requests_total counter");
        let _ = writeln!(out, "tts_proxy_requests_total {}", self.requests_total());

        let _ = writeln!(
            out,
            "# HELP tts_proxy_cache_hits_total Total number of requests served from cache"
        );
        let _ = writeln!(out, "# TYPE tts_proxy_cache_hits_total counter");
        let _ = writeln!(out, "tts_proxy_cache_hits_total {}", self.cache_hits_total());

        let _ = writeln!(
            out,
            "# HELP tts_proxy_upstream_failures_total Total number of failed upstream attempts"
        );
        let _ = writeln!(out, "# TYPE tts_proxy_upstream_failures_total counter");
        let mut failures: Vec<(String, u64)> = self
            .upstream_failures
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        failures.sort();
        for (uri, count) in failures {
            let _ = writeln!(
                out,
                "tts_proxy_upstream_failures_total{{uri=\"{}\"}} {count}",
                escape_label(&uri)
            );
        }

        let _ = writeln!(
            out,
            "# HELP tts_proxy_latency_seconds Time from request to first audio chunk"
        );
        let _ = writeln!(out, "# TYPE tts_proxy_latency_seconds histogram");
        let mut cumulative = 0u64;
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            cumulative += self.latency_buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "tts_proxy_latency_seconds_bucket{{le=\"{bound}\"}} {cumulative}"
            );
        }
        cumulative += self.latency_buckets[LATENCY_BUCKETS.len()].load(Ordering::Relaxed);
        let _ = writeln!(
            out,
            "tts_proxy_latency_seconds_bucket{{le=\"+Inf\"}} {cumulative}"
        );
        let sum_secs = self.latency_sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "tts_proxy_latency_seconds_sum {sum_secs}");
        let _ = writeln!(out, "tts_proxy_latency_seconds_count {}", self.latency_count());

        out
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ProxyMetrics::new();
        assert_eq!(metrics.requests_total(), 0);
        assert_eq!(metrics.cache_hits_total(), 0);
        assert_eq!(metrics.upstream_failures("tcp://a:1"), 0);
    }

    #[test]
    fn test_counters() {
        let metrics = ProxyMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_cache_hit();
        metrics.record_upstream_failure("tcp://a:1");
        metrics.record_upstream_failure("tcp://a:1");
        metrics.record_upstream_failure("tcp://b:2");

        assert_eq!(metrics.requests_total(), 2);
        assert_eq!(metrics.cache_hits_total(), 1);
        assert_eq!(metrics.upstream_failures("tcp://a:1"), 2);
        assert_eq!(metrics.upstream_failures("tcp://b:2"), 1);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = ProxyMetrics::new();
        metrics.record_request();
        metrics.record_upstream_failure("tcp://a:1");
        metrics.record_latency(Duration::from_millis(75));
        metrics.record_latency(Duration::from_secs(120));

        let text = metrics.render_prometheus();

        assert!(text.contains("tts_proxy_requests_total 1\n"));
        assert!(text.contains("tts_proxy_cache_hits_total 0\n"));
        assert!(text.contains("tts_proxy_upstream_failures_total{uri=\"tcp://a:1\"} 1\n"));
        assert!(text.contains("tts_proxy_latency_seconds_bucket{le=\"0.05\"} 0\n"));
        assert!(text.contains("tts_proxy_latency_seconds_bucket{le=\"0.1\"} 1\n"));
        assert!(text.contains("tts_proxy_latency_seconds_bucket{le=\"60\"} 1\n"));
        assert!(text.contains("tts_proxy_latency_seconds_bucket{le=\"+Inf\"} 2\n"));
        assert!(text.contains("tts_proxy_latency_seconds_count 2\n"));
        assert!(text.contains("# TYPE tts_proxy_latency_seconds histogram"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label("a\"b\\c"), "a\\\"b\\\\c");
    }
}
