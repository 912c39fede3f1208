//! # Crawler Module
//!
//! Implements the engine that moves requests through the crawl pipeline.
//!
//! ## Overview
//!
//! The crawler module provides the main `Crawler` struct and the three kinds of
//! worker it schedules. Workers never talk to each other directly; they only
//! push to and pull from the two holders, so each stage can be throttled on
//! its own.
//!
//! ```text
//! seeds ─┐
//!        ├─> RequestHolder ─> spider workers ─> PageHolder ─> exporter worker ─> exporters
//! supplier┘        ^               │
//!                  └── follow-ups ─┘
//! ```
//!
//! ## Key Components
//!
//! - **Crawler**: Validated assembly; runs the lifecycle INIT, RUNNING, STOPPED
//! - **Supplier Worker**: Pulls batches from the request supplier while the
//!   request holder is below its threshold
//! - **Spider Worker**: Fetches, extracts, enqueues follow-ups and queues pages
//! - **Exporter Worker**: Hands every queued page to each exporter in order
//!
//! ## Internal Components
//!
//! - `pause`: a sleep that ends early when the worker is cancelled
//! - `guarded`: runs a collaborator call, turning a panic into an error

mod core;
mod exporter_worker;
mod spider_worker;
mod supplier_worker;

pub use core::Crawler;
pub(crate) use exporter_worker::ExporterWorker;
pub(crate) use spider_worker::SpiderWorker;
pub(crate) use supplier_worker::SupplierWorker;

use crate::error::CrawlError;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `duration` unless `token` is cancelled first. Returns false when
/// cancelled.
pub(crate) async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Awaits a collaborator call. A panic inside it becomes a `CrawlError` so
/// the calling worker keeps running.
pub(crate) async fn guarded<T, F>(what: &str, fut: F) -> Result<T, CrawlError>
where
    F: Future<Output = Result<T, CrawlError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(CrawlError::General(format!("{what} panicked: {message}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_ends_early_on_cancel() {
        let token = CancellationToken::new();
        let child = token.child_token();
        token.cancel();
        let started = std::time::Instant::now();
        assert!(!pause(&child, Duration::from_secs(10)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn guarded_turns_panics_into_errors() {
        let result: Result<(), CrawlError> =
            guarded("extractor", async { panic!("boom") }).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("extractor panicked: boom"));

        let ok = guarded("extractor", async { Ok::<_, CrawlError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }
}
