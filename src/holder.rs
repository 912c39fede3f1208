//! Bounded holders between pipeline stages.
//!
//! Two holders connect the workers: the [`RequestHolder`] feeds spider workers
//! with requests (from seeds, the supplier, and discovered links), and the
//! [`PageHolder`] feeds the exporter worker with processed pages.
//!
//! Both are bounded, multi-producer multi-consumer, and never block
//! indefinitely: `push` gives up after the push timeout and drops the item,
//! `pull` gives up after the pull timeout and returns `None`. Callers that want
//! backpressure check [`RequestHolder::size`] against their own threshold before
//! producing more.
//!
//! ## Key Components
//!
//! - **`BoundedQueue`**: a `kanal` bounded channel with timed send and receive.
//! - **`LifetimeCounter`**: total accepted items, wrapping to zero at its limit.
//! - **`QueueRequestHolder`**: validates requests and consults an optional
//!   [`Reserver`] so each identity is enqueued at most once.
//! - **`QueuePageHolder`**: refuses pages whose fetch failed.

use crate::page::Page;
use crate::request::Request;
use crate::reserver::Reserver;
use async_trait::async_trait;
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const DEFAULT_REQUEST_HOLDER_CAPACITY: usize = 100_000;
pub const DEFAULT_PAGE_HOLDER_CAPACITY: usize = 10_000;
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_millis(200);

/// Largest value the lifetime counter reaches before wrapping to zero.
pub const DEFAULT_COUNTER_LIMIT: u64 = i64::MAX as u64;

#[async_trait]
pub trait RequestHolder: Send + Sync {
    /// Offers a request. Returns false when it was invalid, a duplicate, or
    /// the holder stayed full for the whole push timeout.
    async fn push(&self, request: Request) -> bool;

    /// Takes the next request, or `None` after the pull timeout.
    async fn pull(&self) -> Option<Request>;

    /// Requests currently waiting.
    fn size(&self) -> usize;

    /// Requests accepted over the holder's lifetime.
    fn total(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[async_trait]
pub trait PageHolder: Send + Sync {
    /// Offers a page. Returns false when the page has an error or the holder
    /// stayed full for the whole push timeout.
    async fn push(&self, page: Page) -> bool;

    /// Takes the next page, or `None` after the pull timeout.
    async fn pull(&self) -> Option<Page>;

    fn size(&self) -> usize;

    fn total(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[derive(Debug)]
pub(crate) struct LifetimeCounter {
    value: AtomicU64,
    limit: u64,
}

impl LifetimeCounter {
    pub(crate) fn new(limit: u64) -> Self {
        LifetimeCounter {
            value: AtomicU64::new(0),
            limit,
        }
    }

    pub(crate) fn increment(&self) {
        let limit = self.limit;
        // fetch_update only fails when the closure returns None.
        let _ = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(if current >= limit { 0 } else { current + 1 })
            });
    }

    pub(crate) fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

pub(crate) struct BoundedQueue<T> {
    tx: AsyncSender<T>,
    rx: AsyncReceiver<T>,
    push_timeout: Duration,
    pull_timeout: Duration,
    counter: LifetimeCounter,
}

impl<T: Send + 'static> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize, push_timeout: Duration, pull_timeout: Duration) -> Self {
        let (tx, rx) = kanal::bounded_async(capacity.max(1));
        BoundedQueue {
            tx,
            rx,
            push_timeout,
            pull_timeout,
            counter: LifetimeCounter::new(DEFAULT_COUNTER_LIMIT),
        }
    }

    pub(crate) fn with_counter_limit(mut self, limit: u64) -> Self {
        self.counter = LifetimeCounter::new(limit);
        self
    }

    pub(crate) async fn offer(&self, item: T) -> bool {
        match tokio::time::timeout(self.push_timeout, self.tx.send(item)).await {
            Ok(Ok(())) => {
                self.counter.increment();
                true
            }
            Ok(Err(e)) => {
                warn!("Holder channel closed, dropping item: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    pub(crate) async fn poll(&self) -> Option<T> {
        match tokio::time::timeout(self.pull_timeout, self.rx.recv()).await {
            Ok(Ok(item)) => Some(item),
            Ok(Err(e)) => {
                warn!("Holder channel closed: {}", e);
                None
            }
            Err(_) => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn total(&self) -> u64 {
        self.counter.get()
    }
}

/// The default [`RequestHolder`].
pub struct QueueRequestHolder {
    queue: BoundedQueue<Request>,
    reserver: Option<Arc<dyn Reserver>>,
}

impl QueueRequestHolder {
    pub fn new(capacity: usize, push_timeout: Duration, pull_timeout: Duration) -> Self {
        QueueRequestHolder {
            queue: BoundedQueue::new(capacity, push_timeout, pull_timeout),
            reserver: None,
        }
    }

    /// Every pushed request is first reserved; duplicates are refused.
    pub fn with_reserver(mut self, reserver: Arc<dyn Reserver>) -> Self {
        self.reserver = Some(reserver);
        self
    }

    pub fn reserver(&self) -> Option<&Arc<dyn Reserver>> {
        self.reserver.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn with_counter_limit(mut self, limit: u64) -> Self {
        self.queue = self.queue.with_counter_limit(limit);
        self
    }
}

impl Default for QueueRequestHolder {
    fn default() -> Self {
        Self::new(
            DEFAULT_REQUEST_HOLDER_CAPACITY,
            DEFAULT_PUSH_TIMEOUT,
            DEFAULT_PULL_TIMEOUT,
        )
    }
}

#[async_trait]
impl RequestHolder for QueueRequestHolder {
    async fn push(&self, request: Request) -> bool {
        if !request.is_valid() {
            debug!("Refusing invalid request: {}", request);
            return false;
        }
        if let Some(reserver) = &self.reserver {
            if !reserver.reserve(&request) {
                trace!("Refusing duplicate request: {}", request);
                return false;
            }
        }
        let url = request.url().to_string();
        let accepted = self.queue.offer(request).await;
        if !accepted {
            debug!("Request holder full, dropping {}", url);
        }
        accepted
    }

    async fn pull(&self) -> Option<Request> {
        self.queue.poll().await
    }

    fn size(&self) -> usize {
        self.queue.len()
    }

    fn total(&self) -> u64 {
        self.queue.total()
    }
}

/// The default [`PageHolder`].
pub struct QueuePageHolder {
    queue: BoundedQueue<Page>,
}

impl QueuePageHolder {
    pub fn new(capacity: usize, push_timeout: Duration, pull_timeout: Duration) -> Self {
        QueuePageHolder {
            queue: BoundedQueue::new(capacity, push_timeout, pull_timeout),
        }
    }
}

impl Default for QueuePageHolder {
    fn default() -> Self {
        Self::new(
            DEFAULT_PAGE_HOLDER_CAPACITY,
            DEFAULT_PUSH_TIMEOUT,
            DEFAULT_PULL_TIMEOUT,
        )
    }
}

#[async_trait]
impl PageHolder for QueuePageHolder {
    async fn push(&self, page: Page) -> bool {
        if page.has_error() {
            debug!("Refusing errored page: {}", page.request());
            return false;
        }
        let url = page.url().to_string();
        let accepted = self.queue.offer(page).await;
        if !accepted {
            debug!("Page holder full, dropping {}", url);
        }
        accepted
    }

    async fn pull(&self) -> Option<Page> {
        self.queue.poll().await
    }

    fn size(&self) -> usize {
        self.queue.len()
    }

    fn total(&self) -> u64 {
        self.queue.total()
    }
}
