// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - Because if you can't measure it, it didn't happen
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters for the ingest run. Every worker and every HTTP call
// bumps these without taking a lock; the orchestrator takes a snapshot at
// the end of each quarter and logs it.

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::Instant;

/// The metrics snapshot - what gets logged
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub filings_ingested: u64,
    pub filings_skipped: u64,
    pub filings_failed: u64,
    pub holdings_written: u64,
    pub http_requests: u64,
    pub rate_limited_responses: u64,
    pub transient_retries: u64,
    pub uptime_seconds: u64,
    pub filings_per_minute: f64,
}

/// Thread-safe atomic metrics collector
pub struct IngestMetrics {
    filings_ingested: AtomicU64,
    filings_skipped: AtomicU64,
    filings_failed: AtomicU64,
    holdings_written: AtomicU64,
    http_requests: AtomicU64,
    rate_limited_responses: AtomicU64,
    transient_retries: AtomicU64,
    start_time: Instant,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            filings_ingested: AtomicU64::new(0),
            filings_skipped: AtomicU64::new(0),
            filings_failed: AtomicU64::new(0),
            holdings_written: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            rate_limited_responses: AtomicU64::new(0),
            transient_retries: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_ingested(&self, holdings: u64) {
        self.filings_ingested.fetch_add(1, Ordering::Relaxed);
        self.holdings_written.fetch_add(holdings, Ordering::Relaxed);
    }

    pub fn increment_skipped(&self) {
        self.filings_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.filings_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_http_requests(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rate_limited(&self) {
        self.rate_limited_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transient_retries(&self) {
        self.transient_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all metrics (lock-free reads)
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        let ingested = self.filings_ingested.load(Ordering::Relaxed);
        let filings_per_minute = if uptime > 0 {
            (ingested as f64 / uptime as f64) * 60.0
        } else {
            0.0
        };

        MetricsSnapshot {
            filings_ingested: ingested,
            filings_skipped: self.filings_skipped.load(Ordering::Relaxed),
            filings_failed: self.filings_failed.load(Ordering::Relaxed),
            holdings_written: self.holdings_written.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            rate_limited_responses: self.rate_limited_responses.load(Ordering::Relaxed),
            transient_retries: self.transient_retries.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            filings_per_minute,
        }
    }

    /// Filings that left the queue one way or another.
    pub fn completed(&self) -> u64 {
        self.filings_ingested.load(Ordering::Relaxed)
            + self.filings_skipped.load(Ordering::Relaxed)
            + self.filings_failed.load(Ordering::Relaxed)
    }
}
