//! Module for tracking the lifecycle state of the crawler.
//!
//! `CrawlerState` holds the crawler's status (INIT, RUNNING, STOPPED), the
//! run's start time, and an atomic count of live worker tasks. A crawler moves
//! through its statuses exactly once; STOPPED is terminal.

use crate::error::CrawlError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlerStatus {
    Init,
    Running,
    Stopped,
}

impl fmt::Display for CrawlerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlerStatus::Init => "INIT",
            CrawlerStatus::Running => "RUNNING",
            CrawlerStatus::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// How a running crawler decides when to finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Stop once the request holder has stayed empty long enough.
    #[default]
    Client,
    /// Run until stopped from outside.
    Server,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Client => f.write_str("client"),
            Mode::Server => f.write_str("server"),
        }
    }
}

/// Represents the shared state of one crawler.
#[derive(Debug)]
pub struct CrawlerState {
    status: RwLock<CrawlerStatus>,
    claimed: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    /// The number of worker tasks currently running.
    pub active_workers: AtomicUsize,
}

impl CrawlerState {
    /// Creates a new, atomically reference-counted `CrawlerState`.
    pub fn new() -> Arc<Self> {
        Arc::new(CrawlerState {
            status: RwLock::new(CrawlerStatus::Init),
            claimed: AtomicBool::new(false),
            started_at: Mutex::new(None),
            active_workers: AtomicUsize::new(0),
        })
    }

    pub fn status(&self) -> CrawlerStatus {
        *self.status.read()
    }

    /// Reserves the single start of this crawler. Fails unless the status is
    /// INIT and nobody else has claimed it.
    pub(crate) fn claim(&self) -> Result<(), CrawlError> {
        let status = self.status();
        if status != CrawlerStatus::Init
            || self
                .claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(CrawlError::AlreadyStarted(status));
        }
        Ok(())
    }

    pub(crate) fn mark_running(&self) {
        *self.started_at.lock() = Some(Instant::now());
        *self.status.write() = CrawlerStatus::Running;
    }

    pub(crate) fn mark_stopped(&self) {
        *self.status.write() = CrawlerStatus::Stopped;
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock()
    }

    /// Time since the crawler entered RUNNING.
    pub fn elapsed(&self) -> Duration {
        self.started_at()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Counts the calling task as a live worker until the returned guard is
    /// dropped, which also happens when the task panics or is aborted.
    pub(crate) fn worker_started(self: &Arc<Self>) -> ActiveWorker {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        ActiveWorker {
            state: Arc::clone(self),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }
}

pub(crate) struct ActiveWorker {
    state: Arc<CrawlerState>,
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.state.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}
