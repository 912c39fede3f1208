//! Duplicate detection over request identities.
//!
//! A [`Reserver`] answers "has this request been seen before?" and records it
//! when it has not, as one atomic step: when two spider workers race to reserve
//! the same identity, exactly one of them wins.
//!
//! - [`SetReserver`] keeps every identity in a concurrent set: exact, but memory
//!   grows with the crawl.
//! - [`BloomReserver`] keeps a fixed-size Bloom filter: bounded memory, at the
//!   price of occasionally rejecting a request that was never seen.

use crate::bloom_filter::BloomFilter;
use crate::request::Request;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Expected corpus size the default Bloom reserver is dimensioned for.
pub const DEFAULT_EXPECTED_REQUESTS: usize = 5_000_000;
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.03;

pub trait Reserver: Send + Sync {
    /// Returns true if `request` was not seen before; it is now recorded.
    fn reserve(&self, request: &Request) -> bool;

    /// Forgets everything. Meant for reuse between crawl runs.
    fn reset(&self);

    /// Number of identities accepted so far.
    fn count(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct SetReserver {
    seen: DashSet<String>,
}

impl SetReserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reserver for SetReserver {
    fn reserve(&self, request: &Request) -> bool {
        let accepted = self.seen.insert(request.identity());
        if !accepted {
            trace!("Duplicate request rejected: {}", request);
        }
        accepted
    }

    fn reset(&self) {
        self.seen.clear();
    }

    fn count(&self) -> usize {
        self.seen.len()
    }
}

#[derive(Debug)]
pub struct BloomReserver {
    filter: Mutex<BloomFilter>,
    accepted: AtomicUsize,
}

impl BloomReserver {
    /// A filter sized for [`DEFAULT_EXPECTED_REQUESTS`] at [`DEFAULT_FALSE_POSITIVE_RATE`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EXPECTED_REQUESTS, DEFAULT_FALSE_POSITIVE_RATE)
    }

    pub fn with_capacity(expected_requests: usize, false_positive_rate: f64) -> Self {
        BloomReserver {
            filter: Mutex::new(BloomFilter::with_rate(
                expected_requests,
                false_positive_rate,
            )),
            accepted: AtomicUsize::new(0),
        }
    }
}

impl Default for BloomReserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Reserver for BloomReserver {
    fn reserve(&self, request: &Request) -> bool {
        let identity = request.identity();
        let mut filter = self.filter.lock();
        if filter.might_contain(&identity) {
            trace!("Request rejected by bloom filter: {}", request);
            return false;
        }
        filter.add(&identity);
        self.accepted.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn reset(&self) {
        let mut filter = self.filter.lock();
        filter.clear();
        self.accepted.store(0, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn req(i: usize) -> Request {
        Request::parse(&format!("https://example.com/page/{i}")).unwrap()
    }

    fn exercise(reserver: &dyn Reserver) {
        assert!(reserver.reserve(&req(1)));
        assert!(!reserver.reserve(&req(1)));
        assert!(reserver.reserve(&req(2)));
        // Same identity through a fragment.
        let fragment = Request::parse("https://example.com/page/2#section").unwrap();
        assert!(!reserver.reserve(&fragment));
        assert_eq!(reserver.count(), 2);

        reserver.reset();
        assert_eq!(reserver.count(), 0);
        assert!(reserver.reserve(&req(1)));
    }

    #[test]
    fn set_reserver_contract() {
        exercise(&SetReserver::new());
    }

    #[test]
    fn bloom_reserver_contract() {
        exercise(&BloomReserver::with_capacity(10_000, 0.01));
    }

    #[test]
    fn bloom_reserver_never_accepts_a_duplicate() {
        let reserver = BloomReserver::with_capacity(1_000, 0.01);
        let accepted: Vec<usize> = (0..1_000).filter(|i| reserver.reserve(&req(*i))).collect();
        // Some legitimate requests may be lost to false positives, but few.
        assert!(accepted.len() > 970);
        for i in accepted {
            assert!(!reserver.reserve(&req(i)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn racing_reservations_have_one_winner() {
        let set = Arc::new(SetReserver::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let set = Arc::clone(&set);
            handles.push(tokio::spawn(async move {
                (0..200).filter(|i| set.reserve(&req(*i))).count()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            winners += handle.await.unwrap();
        }
        assert_eq!(winners, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn racing_reservations_agree_with_count() {
        for reserver in [
            Arc::new(SetReserver::new()) as Arc<dyn Reserver>,
            Arc::new(BloomReserver::with_capacity(10_000, 0.01)) as Arc<dyn Reserver>,
        ] {
            let mut handles = Vec::new();
            for _ in 0..16 {
                let reserver = Arc::clone(&reserver);
                handles.push(tokio::spawn(async move {
                    (0..200).filter(|i| reserver.reserve(&req(*i))).count()
                }));
            }
            let mut total = 0;
            for handle in handles {
                total += handle.await.unwrap();
            }
            // Each identity was won by exactly one task.
            assert_eq!(total, reserver.count());
            assert!(total <= 200 && total > 190);
        }
    }
}
