//! Simple metrics collection for observability
//!
//! This module provides lightweight metrics collection using atomic counters.
//! Per-purpose counters are created once from the configured policies, so
//! recording never allocates or locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use turnstile::Verdict;

/// Core metrics collected by the server
pub struct Metrics {
    /// Server start time
    start_time: Instant,

    /// Total admission requests received
    pub total_requests: AtomicU64,

    /// Admission decisions
    pub requests_allowed: AtomicU64,
    pub requests_denied: AtomicU64,
    pub requests_failed_open: AtomicU64,

    /// Requests for an unknown purpose or with an invalid body
    pub requests_invalid: AtomicU64,

    /// Requests by purpose
    purposes: HashMap<String, PurposeCounters>,

    /// Request latency buckets (in microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_under_10ms: AtomicU64,
    pub latency_under_100ms: AtomicU64,
    pub latency_under_1s: AtomicU64,
    pub latency_over_1s: AtomicU64,

    /// Histogram support
    pub latency_sum_micros: AtomicU64,
    pub latency_count: AtomicU64,
}

#[derive(Default)]
struct PurposeCounters {
    allowed: AtomicU64,
    denied: AtomicU64,
}

impl Metrics {
    /// Create a metrics instance tracking the given purposes
    pub fn new<I, P>(purposes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            requests_allowed: AtomicU64::new(0),
            requests_denied: AtomicU64::new(0),
            requests_failed_open: AtomicU64::new(0),
            requests_invalid: AtomicU64::new(0),
            purposes: purposes
                .into_iter()
                .map(|purpose| (purpose.into(), PurposeCounters::default()))
                .collect(),
            latency_under_1ms: AtomicU64::new(0),
            latency_under_10ms: AtomicU64::new(0),
            latency_under_100ms: AtomicU64::new(0),
            latency_under_1s: AtomicU64::new(0),
            latency_over_1s: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }

    /// Record an admission decision and its latency
    pub fn record_admission(&self, purpose: &str, latency_us: u64, verdict: Verdict) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match verdict {
            Verdict::Allowed => self.requests_allowed.fetch_add(1, Ordering::Relaxed),
            Verdict::Denied => self.requests_denied.fetch_add(1, Ordering::Relaxed),
            Verdict::FailedOpen => self.requests_failed_open.fetch_add(1, Ordering::Relaxed),
        };

        if let Some(counters) = self.purposes.get(purpose) {
            if verdict.is_allowed() {
                counters.allowed.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.denied.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.record_latency(latency_us);
    }

    /// Record a request that never reached the limiter
    pub fn record_invalid(&self, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.requests_invalid.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_us);
    }

    fn record_latency(&self, latency_us: u64) {
        match latency_us {
            0..=999 => self.latency_under_1ms.fetch_add(1, Ordering::Relaxed),
            1000..=9999 => self.latency_under_10ms.fetch_add(1, Ordering::Relaxed),
            10000..=99999 => self.latency_under_100ms.fetch_add(1, Ordering::Relaxed),
            100000..=999999 => self.latency_under_1s.fetch_add(1, Ordering::Relaxed),
            _ => self.latency_over_1s.fetch_add(1, Ordering::Relaxed),
        };

        self.latency_sum_micros
            .fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(1500 + self.purposes.len() * 120);

        output.push_str("# HELP turnstile_uptime_seconds Time since server start in seconds\n");
        output.push_str("# TYPE turnstile_uptime_seconds gauge\n");
        output.push_str(&format!(
            "turnstile_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        output.push_str("# HELP turnstile_requests_total Total number of admission requests\n");
        output.push_str("# TYPE turnstile_requests_total counter\n");
        output.push_str(&format!(
            "turnstile_requests_total {}\n\n",
            self.total_requests.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP turnstile_requests_allowed Requests admitted with tokens\n");
        output.push_str("# TYPE turnstile_requests_allowed counter\n");
        output.push_str(&format!(
            "turnstile_requests_allowed {}\n\n",
            self.requests_allowed.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP turnstile_requests_denied Requests rejected with 429\n");
        output.push_str("# TYPE turnstile_requests_denied counter\n");
        output.push_str(&format!(
            "turnstile_requests_denied {}\n\n",
            self.requests_denied.load(Ordering::Relaxed)
        ));

        output.push_str(
            "# HELP turnstile_requests_failed_open Requests admitted because the store was unavailable\n",
        );
        output.push_str("# TYPE turnstile_requests_failed_open counter\n");
        output.push_str(&format!(
            "turnstile_requests_failed_open {}\n\n",
            self.requests_failed_open.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP turnstile_requests_invalid Requests for unknown purposes or with invalid bodies\n");
        output.push_str("# TYPE turnstile_requests_invalid counter\n");
        output.push_str(&format!(
            "turnstile_requests_invalid {}\n\n",
            self.requests_invalid.load(Ordering::Relaxed)
        ));

        // Sorted so the output is stable between scrapes
        let mut purposes: Vec<_> = self.purposes.iter().collect();
        purposes.sort_by(|a, b| a.0.cmp(b.0));

        output.push_str("# HELP turnstile_requests_by_purpose Admission decisions by purpose\n");
        output.push_str("# TYPE turnstile_requests_by_purpose counter\n");
        for (purpose, counters) in purposes {
            output.push_str(&format!(
                "turnstile_requests_by_purpose{{purpose=\"{purpose}\",decision=\"allowed\"}} {}\n",
                counters.allowed.load(Ordering::Relaxed)
            ));
            output.push_str(&format!(
                "turnstile_requests_by_purpose{{purpose=\"{purpose}\",decision=\"denied\"}} {}\n",
                counters.denied.load(Ordering::Relaxed)
            ));
        }
        output.push('\n');

        // Latency distribution
        let under_1ms = self.latency_under_1ms.load(Ordering::Relaxed);
        let under_10ms = under_1ms + self.latency_under_10ms.load(Ordering::Relaxed);
        let under_100ms = under_10ms + self.latency_under_100ms.load(Ordering::Relaxed);
        let under_1s = under_100ms + self.latency_under_1s.load(Ordering::Relaxed);

        output.push_str("# HELP turnstile_request_duration_seconds Request latency distribution\n");
        output.push_str("# TYPE turnstile_request_duration_seconds histogram\n");
        output.push_str(&format!(
            "turnstile_request_duration_seconds_bucket{{le=\"0.001\"}} {under_1ms}\n"
        ));
        output.push_str(&format!(
            "turnstile_request_duration_seconds_bucket{{le=\"0.01\"}} {under_10ms}\n"
        ));
        output.push_str(&format!(
            "turnstile_request_duration_seconds_bucket{{le=\"0.1\"}} {under_100ms}\n"
        ));
        output.push_str(&format!(
            "turnstile_request_duration_seconds_bucket{{le=\"1\"}} {under_1s}\n"
        ));
        output.push_str(&format!(
            "turnstile_request_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
            self.latency_count.load(Ordering::Relaxed)
        ));

        let latency_sum_seconds =
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!(
            "turnstile_request_duration_seconds_sum {latency_sum_seconds:.6}\n"
        ));
        output.push_str(&format!(
            "turnstile_request_duration_seconds_count {}\n",
            self.latency_count.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}
