//! External request sources.
//!
//! A [`RequestSupplier`] feeds requests into a running crawl from outside the
//! seed list, e.g. a message queue or a database table. The supplier worker
//! polls it for batches while the request holder stays below its threshold.

use crate::error::CrawlError;
use crate::request::Request;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[async_trait]
pub trait RequestSupplier: Send + Sync {
    /// Whether a batch is available right now. Returning false does not end
    /// the supplier; it is asked again later.
    async fn has_next(&self) -> bool;

    async fn next_batch(&self) -> Result<Vec<Request>, CrawlError>;

    async fn init(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// Supplies a fixed list of requests in batches of `batch_size`.
#[derive(Debug)]
pub struct IterSupplier {
    pending: Mutex<VecDeque<Request>>,
    batch_size: usize,
}

impl IterSupplier {
    pub fn new(requests: impl IntoIterator<Item = Request>, batch_size: usize) -> Self {
        IterSupplier {
            pending: Mutex::new(requests.into_iter().collect()),
            batch_size: batch_size.max(1),
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl RequestSupplier for IterSupplier {
    async fn has_next(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    async fn next_batch(&self) -> Result<Vec<Request>, CrawlError> {
        let mut pending = self.pending.lock();
        let n = self.batch_size.min(pending.len());
        Ok(pending.drain(..n).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_batches_until_exhausted() {
        let requests = (0..5).map(|i| Request::parse(&format!("https://example.com/{i}")).unwrap());
        let supplier = IterSupplier::new(requests, 2);

        let mut sizes = Vec::new();
        while supplier.has_next().await {
            sizes.push(supplier.next_batch().await.unwrap().len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(supplier.remaining(), 0);
        assert!(supplier.next_batch().await.unwrap().is_empty());
    }
}
