//! # Supplier Worker Module
//!
//! Moves requests from the configured [`RequestSupplier`] into the request
//! holder. The worker backs off while the holder is at or above its threshold
//! and polls again after a short idle sleep when the supplier has nothing.
//! Batch errors are logged; the worker keeps polling.

use super::{guarded, pause};
use crate::holder::RequestHolder;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use crate::supplier::RequestSupplier;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct SupplierWorker {
    pub(crate) supplier: Arc<dyn RequestSupplier>,
    pub(crate) request_holder: Arc<dyn RequestHolder>,
    pub(crate) threshold: usize,
    pub(crate) pause: Duration,
    /// Sleep between polls of an empty supplier.
    pub(crate) idle_poll: Duration,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) stats: Arc<StatCollector>,
    pub(crate) token: CancellationToken,
}

impl SupplierWorker {
    pub(crate) async fn run(self) {
        let _active = self.state.worker_started();
        debug!("Supplier worker started");

        while !self.token.is_cancelled() {
            let size = self.request_holder.size();
            if size >= self.threshold {
                warn!(
                    "Request holder at {} (threshold {}), supplier pausing for {:?}",
                    size, self.threshold, self.pause
                );
                pause(&self.token, self.pause).await;
                continue;
            }

            match guarded("supplier", async { Ok(self.supplier.has_next().await) }).await {
                Ok(true) => {}
                Ok(false) => {
                    pause(&self.token, self.idle_poll).await;
                    continue;
                }
                Err(e) => {
                    error!("Request supplier failed: {}", e);
                    self.stats.increment_supplier_errors();
                    pause(&self.token, self.idle_poll).await;
                    continue;
                }
            }

            match guarded("supplier", self.supplier.next_batch()).await {
                Ok(batch) => {
                    trace!("Supplier delivered {} request(s)", batch.len());
                    for request in batch {
                        let url = request.url().to_string();
                        if self.request_holder.push(request).await {
                            self.stats.increment_requests_supplied();
                        } else {
                            debug!("Supplied request {} was not enqueued", url);
                            self.stats.increment_requests_dropped();
                        }
                    }
                }
                Err(e) => {
                    error!("Request supplier failed: {}", e);
                    self.stats.increment_supplier_errors();
                    pause(&self.token, self.idle_poll).await;
                }
            }
        }

        debug!("Supplier worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::QueueRequestHolder;
    use crate::request::Request;
    use crate::error::CrawlError;
    use crate::supplier::IterSupplier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// `has_next` panics on its first call; afterwards it serves `inner`.
    struct FlakySupplier {
        inner: IterSupplier,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl RequestSupplier for FlakySupplier {
        async fn has_next(&self) -> bool {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("supplier bug");
            }
            self.inner.has_next().await
        }

        async fn next_batch(&self) -> Result<Vec<Request>, CrawlError> {
            self.inner.next_batch().await
        }
    }

    #[tokio::test]
    async fn supplier_stops_at_threshold() {
        let requests = (0..50).map(|i| Request::parse(&format!("https://example.com/{i}")).unwrap());
        let holder = Arc::new(QueueRequestHolder::new(
            100,
            Duration::from_millis(20),
            Duration::from_millis(20),
        ));
        let stats = Arc::new(StatCollector::new());
        let token = CancellationToken::new();
        let worker = SupplierWorker {
            supplier: Arc::new(IterSupplier::new(requests, 1)),
            request_holder: holder.clone(),
            threshold: 10,
            pause: Duration::from_millis(10),
            idle_poll: Duration::from_millis(10),
            state: CrawlerState::new(),
            stats: stats.clone(),
            token: token.clone(),
        };
        let handle = tokio::spawn(worker.run());

        let deadline = std::time::Instant::now() + Duration::from_millis(300);
        while std::time::Instant::now() < deadline {
            assert!(holder.size() <= 10);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(holder.size(), 10);

        // Draining makes room for more.
        for _ in 0..5 {
            holder.pull().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(holder.size(), 10);
        assert_eq!(stats.requests_enqueued(), 15);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn supplier_survives_a_panicking_has_next() {
        let requests = (0..5).map(|i| Request::parse(&format!("https://example.com/{i}")).unwrap());
        let holder = Arc::new(QueueRequestHolder::new(
            100,
            Duration::from_millis(20),
            Duration::from_millis(20),
        ));
        let stats = Arc::new(StatCollector::new());
        let token = CancellationToken::new();
        let worker = SupplierWorker {
            supplier: Arc::new(FlakySupplier {
                inner: IterSupplier::new(requests, 2),
                panicked: AtomicBool::new(false),
            }),
            request_holder: holder.clone(),
            threshold: 100,
            pause: Duration::from_millis(10),
            idle_poll: Duration::from_millis(10),
            state: CrawlerState::new(),
            stats: stats.clone(),
            token: token.clone(),
        };
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(holder.size(), 5);
        assert_eq!(stats.requests_enqueued(), 5);
        assert_eq!(stats.supplier_errors.load(Ordering::SeqCst), 1);

        token.cancel();
        handle.await.unwrap();
    }
}
