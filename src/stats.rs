//! # Statistics Module
//!
//! Collects counters about the crawler's operation.
//!
//! ## Overview
//!
//! The `StatCollector` is shared by every worker. It counts requests as they
//! enter the request holder (from seeds, the supplier, or discovered links),
//! pages as they are fetched, extracted and exported, and every item that was
//! dropped along the way. Drops are never retried, so these counters are the
//! only record of them.
//!
//! ## Example
//!
//! ```rust,ignore
//! let crawler = CrawlerBuilder::new().add_site(site).add_exporter(exporter).build()?;
//! crawler.crawl().await?;
//! println!("{}", crawler.stats());
//! println!("{}", crawler.stats().to_json_string_pretty()?);
//! ```

use crate::error::CrawlError;
use dashmap::DashMap;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

// A snapshot of the current statistics, used for reporting.
struct StatsSnapshot {
    requests_seeded: usize,
    requests_supplied: usize,
    requests_discovered: usize,
    requests_dropped: usize,
    pages_fetched: usize,
    pages_failed: usize,
    pages_queued: usize,
    pages_dropped: usize,
    pages_exported: usize,
    extract_errors: usize,
    export_errors: usize,
    supplier_errors: usize,
    response_status_counts: BTreeMap<u16, usize>,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn formatted_duration(&self) -> String {
        format!("{:?}", self.elapsed_duration)
    }

    fn requests_enqueued(&self) -> usize {
        self.requests_seeded + self.requests_supplied + self.requests_discovered
    }

    fn pages_per_second(&self) -> f64 {
        let total_seconds = self.elapsed_duration.as_secs_f64();
        if total_seconds > 0.0 {
            self.pages_fetched as f64 / total_seconds
        } else {
            0.0
        }
    }
}

/// Collects and stores statistics about the crawler's operation.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    // Request-related metrics
    pub requests_seeded: AtomicUsize,
    pub requests_supplied: AtomicUsize,
    pub requests_discovered: AtomicUsize,
    pub requests_dropped: AtomicUsize,

    // Page-related metrics
    pub pages_fetched: AtomicUsize,
    pub pages_failed: AtomicUsize,
    pub pages_queued: AtomicUsize,
    pub pages_dropped: AtomicUsize,
    pub pages_exported: AtomicUsize,
    pub response_status_counts: DashMap<u16, usize>,

    // Collaborator failures
    pub extract_errors: AtomicUsize,
    pub export_errors: AtomicUsize,
    pub supplier_errors: AtomicUsize,
}

impl StatCollector {
    /// Creates a new `StatCollector` with all counters initialized to zero.
    pub(crate) fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_seeded: AtomicUsize::new(0),
            requests_supplied: AtomicUsize::new(0),
            requests_discovered: AtomicUsize::new(0),
            requests_dropped: AtomicUsize::new(0),
            pages_fetched: AtomicUsize::new(0),
            pages_failed: AtomicUsize::new(0),
            pages_queued: AtomicUsize::new(0),
            pages_dropped: AtomicUsize::new(0),
            pages_exported: AtomicUsize::new(0),
            response_status_counts: DashMap::new(),
            extract_errors: AtomicUsize::new(0),
            export_errors: AtomicUsize::new(0),
            supplier_errors: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let response_status_counts = self
            .response_status_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        StatsSnapshot {
            requests_seeded: self.requests_seeded.load(Ordering::SeqCst),
            requests_supplied: self.requests_supplied.load(Ordering::SeqCst),
            requests_discovered: self.requests_discovered.load(Ordering::SeqCst),
            requests_dropped: self.requests_dropped.load(Ordering::SeqCst),
            pages_fetched: self.pages_fetched.load(Ordering::SeqCst),
            pages_failed: self.pages_failed.load(Ordering::SeqCst),
            pages_queued: self.pages_queued.load(Ordering::SeqCst),
            pages_dropped: self.pages_dropped.load(Ordering::SeqCst),
            pages_exported: self.pages_exported.load(Ordering::SeqCst),
            extract_errors: self.extract_errors.load(Ordering::SeqCst),
            export_errors: self.export_errors.load(Ordering::SeqCst),
            supplier_errors: self.supplier_errors.load(Ordering::SeqCst),
            response_status_counts,
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_seeded(&self) {
        self.requests_seeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_supplied(&self) {
        self.requests_supplied.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_discovered(&self) {
        self.requests_discovered.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_pages_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_pages_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_pages_queued(&self) {
        self.pages_queued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_pages_dropped(&self) {
        self.pages_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_pages_exported(&self) {
        self.pages_exported.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_extract_errors(&self) {
        self.extract_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_export_errors(&self) {
        self.export_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_supplier_errors(&self) {
        self.supplier_errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a response status code.
    pub(crate) fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    /// Requests accepted into the request holder from any source.
    pub fn requests_enqueued(&self) -> usize {
        self.snapshot().requests_enqueued()
    }

    pub fn pages_exported(&self) -> usize {
        self.pages_exported.load(Ordering::SeqCst)
    }

    pub fn pages_failed(&self) -> usize {
        self.pages_failed.load(Ordering::SeqCst)
    }

    pub fn requests_dropped(&self) -> usize {
        self.requests_dropped.load(Ordering::SeqCst)
    }

    pub fn to_json_string(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {}", snapshot.formatted_duration())?;
        writeln!(f, "  speed    : pages/s: {:.2}", snapshot.pages_per_second())?;
        writeln!(
            f,
            "  requests : enqueued: {} (seed: {}, supplied: {}, discovered: {}), drop: {}",
            snapshot.requests_enqueued(),
            snapshot.requests_seeded,
            snapshot.requests_supplied,
            snapshot.requests_discovered,
            snapshot.requests_dropped
        )?;
        writeln!(
            f,
            "  pages    : fetched: {}, failed: {}, queued: {}, drop: {}, exported: {}",
            snapshot.pages_fetched,
            snapshot.pages_failed,
            snapshot.pages_queued,
            snapshot.pages_dropped,
            snapshot.pages_exported
        )?;
        writeln!(
            f,
            "  errors   : extract: {}, export: {}, supplier: {}",
            snapshot.extract_errors, snapshot.export_errors, snapshot.supplier_errors
        )?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .response_status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_reports() {
        let stats = StatCollector::new();
        stats.increment_requests_seeded();
        stats.increment_requests_seeded();
        stats.increment_requests_discovered();
        stats.increment_requests_dropped();
        stats.increment_pages_fetched();
        stats.increment_pages_exported();
        stats.record_response_status(200);
        stats.record_response_status(200);
        stats.record_response_status(404);

        assert_eq!(stats.requests_enqueued(), 3);
        assert_eq!(stats.requests_dropped(), 1);
        assert_eq!(stats.pages_exported(), 1);

        let json: serde_json::Value =
            serde_json::from_str(&stats.to_json_string().unwrap()).unwrap();
        assert_eq!(json["requests_seeded"], 2);
        assert_eq!(json["response_status_counts"]["200"], 2);

        let text = stats.to_string();
        assert!(text.contains("enqueued: 3"));
        assert!(text.contains("200: 2, 404: 1"));
    }
}
