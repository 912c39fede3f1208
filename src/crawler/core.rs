//! The core Crawler implementation.
//!
//! This module defines the `Crawler` struct, which owns the holders, the
//! collaborators and the worker pool of one crawl run. `crawl` seeds the
//! request holder, runs every collaborator's `init` hook, schedules the
//! workers, and then watches the request holder: in CLIENT mode the crawl ends
//! once the holder has stayed empty for `idle_checks` polls spanning more than
//! the idle timeout, while in SERVER mode it runs until [`Crawler::stop`] or
//! Ctrl-C. Shutdown cancels every worker, marks the crawler STOPPED, waits for
//! the workers, and only then runs the `close` hooks.

use super::{ExporterWorker, SpiderWorker, SupplierWorker};
use crate::builder::CrawlerConfig;
use crate::error::CrawlError;
use crate::exporter::Exporter;
use crate::extractor::Extractor;
use crate::fetcher::Fetcher;
use crate::holder::{PageHolder, RequestHolder};
use crate::site::Site;
use crate::state::{CrawlerState, CrawlerStatus, Mode};
use crate::stats::StatCollector;
use crate::supplier::RequestSupplier;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// How long shutdown waits for workers before aborting them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The orchestrator of one crawl run.
pub struct Crawler {
    config: CrawlerConfig,
    sites: Vec<Arc<Site>>,
    supplier: Option<Arc<dyn RequestSupplier>>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Option<Arc<dyn Extractor>>,
    exporters: Arc<Vec<Arc<dyn Exporter>>>,
    request_holder: Arc<dyn RequestHolder>,
    page_holder: Arc<dyn PageHolder>,
    state: Arc<CrawlerState>,
    stats: Arc<StatCollector>,
    shutdown: CancellationToken,
}

impl Crawler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: CrawlerConfig,
        sites: Vec<Arc<Site>>,
        supplier: Option<Arc<dyn RequestSupplier>>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Option<Arc<dyn Extractor>>,
        exporters: Vec<Arc<dyn Exporter>>,
        request_holder: Arc<dyn RequestHolder>,
        page_holder: Arc<dyn PageHolder>,
    ) -> Self {
        Crawler {
            config,
            sites,
            supplier,
            fetcher,
            extractor,
            exporters: Arc::new(exporters),
            request_holder,
            page_holder,
            state: CrawlerState::new(),
            stats: Arc::new(StatCollector::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs the crawl to completion.
    ///
    /// Returns `CrawlError::AlreadyStarted` if this crawler is not in INIT.
    /// In CLIENT mode the future resolves once the crawl went idle; in SERVER
    /// mode only after [`Crawler::stop`] or Ctrl-C.
    pub async fn crawl(&self) -> Result<(), CrawlError> {
        self.state.claim()?;

        self.seed().await;
        self.run_hooks("init").await;

        self.state.mark_running();
        info!(
            "Crawler running in {} mode: {} site(s), supplier: {}, threads: {}",
            self.config.mode,
            self.sites.len(),
            self.supplier.is_some(),
            self.config.threads
        );

        let mut workers = self.schedule();
        self.watch().await;

        self.shutdown.cancel();
        self.state.mark_stopped();
        join_workers(&mut workers, SHUTDOWN_TIMEOUT).await;
        self.run_hooks("close").await;

        info!(
            "Crawl finished after {:?}. Stats: requests_enqueued={}, pages_exported={}, pages_failed={}, requests_dropped={}",
            self.state.elapsed(),
            self.stats.requests_enqueued(),
            self.stats.pages_exported(),
            self.stats.pages_failed(),
            self.stats.requests_dropped()
        );
        debug!("{}", self.stats);
        Ok(())
    }

    /// Asks a running crawl to finish. Safe to call from any task, any
    /// number of times.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Stop requested");
        }
        self.shutdown.cancel();
    }

    /// A token that is cancelled when this crawl shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn status(&self) -> CrawlerStatus {
        self.state.status()
    }

    pub fn state(&self) -> Arc<CrawlerState> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Returns a cloned Arc to the `StatCollector` used by this crawler.
    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    pub fn request_holder(&self) -> Arc<dyn RequestHolder> {
        Arc::clone(&self.request_holder)
    }

    pub fn page_holder(&self) -> Arc<dyn PageHolder> {
        Arc::clone(&self.page_holder)
    }

    async fn seed(&self) {
        for site in &self.sites {
            let mut accepted = 0;
            for request in site.start_requests() {
                let url = request.url().to_string();
                if self.request_holder.push(request).await {
                    self.stats.increment_requests_seeded();
                    accepted += 1;
                } else {
                    warn!("Seed {} of site '{}' was not enqueued", url, site.name());
                    self.stats.increment_requests_dropped();
                }
            }
            debug!("Seeded {} request(s) from site '{}'", accepted, site.name());
        }
    }

    /// Runs `init` or `close` on every collaborator. Failures are logged and
    /// do not stop the remaining hooks.
    async fn run_hooks(&self, hook: &'static str) {
        let opening = hook == "init";
        if let Some(supplier) = &self.supplier {
            let fut = if opening { supplier.init() } else { supplier.close() };
            report(hook, "supplier", fut).await;
        }
        let fut = if opening {
            self.fetcher.init()
        } else {
            self.fetcher.close()
        };
        report(hook, "fetcher", fut).await;
        if let Some(extractor) = &self.extractor {
            let fut = if opening { extractor.init() } else { extractor.close() };
            report(hook, "extractor", fut).await;
        }
        for exporter in self.exporters.iter() {
            let fut = if opening { exporter.init() } else { exporter.close() };
            report(hook, exporter.name(), fut).await;
        }
    }

    fn schedule(&self) -> JoinSet<()> {
        let config = &self.config;
        let mut workers = JoinSet::new();

        if let Some(supplier) = &self.supplier {
            trace!("Spawning supplier worker");
            workers.spawn(
                SupplierWorker {
                    supplier: Arc::clone(supplier),
                    request_holder: Arc::clone(&self.request_holder),
                    threshold: config.request_holder_threshold,
                    pause: config.request_holder_pause(),
                    idle_poll: config.pull_timeout(),
                    state: Arc::clone(&self.state),
                    stats: Arc::clone(&self.stats),
                    token: self.shutdown.child_token(),
                }
                .run(),
            );
        }

        let spiders = config.spider_workers(self.supplier.is_some());
        trace!("Spawning {} spider worker(s)", spiders);
        for id in 0..spiders {
            workers.spawn(
                SpiderWorker {
                    id,
                    request_holder: Arc::clone(&self.request_holder),
                    page_holder: Arc::clone(&self.page_holder),
                    fetcher: Arc::clone(&self.fetcher),
                    extractor: self.extractor.clone(),
                    page_threshold: config.page_holder_threshold,
                    pause: config.page_holder_pause(),
                    state: Arc::clone(&self.state),
                    stats: Arc::clone(&self.stats),
                    token: self.shutdown.child_token(),
                }
                .run(),
            );
        }

        trace!("Spawning exporter worker");
        workers.spawn(
            ExporterWorker {
                page_holder: Arc::clone(&self.page_holder),
                exporters: Arc::clone(&self.exporters),
                pause: config.exporter_pause(),
                state: Arc::clone(&self.state),
                stats: Arc::clone(&self.stats),
                token: self.shutdown.child_token(),
            }
            .run(),
        );
        workers
    }

    /// Blocks until the crawl should end.
    async fn watch(&self) {
        let poll = self.config.poll_interval();
        let mut idle = IdleTracker::new();
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping workers.");
                    return;
                }
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating graceful shutdown.");
                    return;
                }
                _ = tokio::time::sleep(poll) => {}
            }

            if self.config.mode == Mode::Server {
                continue;
            }
            if !self.request_holder.is_empty() {
                idle.busy();
                continue;
            }
            idle.empty();
            trace!("Request holder empty, idle check {}", idle.checks);
            if idle.exhausted(self.config.idle_checks, self.config.idle_timeout()) {
                info!(
                    "Crawl idle for {:?} over {} checks, initiating shutdown.",
                    idle.last_busy.elapsed(),
                    idle.checks
                );
                return;
            }
        }
    }
}

/// Consecutive empty polls of the request holder in CLIENT mode.
struct IdleTracker {
    checks: u32,
    last_busy: Instant,
}

impl IdleTracker {
    fn new() -> Self {
        IdleTracker {
            checks: 0,
            last_busy: Instant::now(),
        }
    }

    fn busy(&mut self) {
        self.checks = 0;
        self.last_busy = Instant::now();
    }

    fn empty(&mut self) {
        self.checks = self.checks.saturating_add(1);
    }

    fn exhausted(&self, needed: u32, timeout: Duration) -> bool {
        self.checks >= needed && self.last_busy.elapsed() > timeout
    }
}

/// Waits for every worker. Tasks still running after `timeout` are aborted,
/// and their termination is awaited as well.
async fn join_workers(workers: &mut JoinSet<()>, timeout: Duration) {
    let drained = tokio::time::timeout(timeout, async {
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Worker failed during shutdown: {}", e);
            }
        }
    })
    .await;

    match drained {
        Ok(()) => trace!("All workers completed during shutdown"),
        Err(_) => {
            warn!(
                "{} worker(s) did not complete within {:?}, aborting them",
                workers.len(),
                timeout
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            trace!("Aborted workers terminated");
        }
    }
}

async fn report<F>(hook: &str, component: &str, fut: F)
where
    F: Future<Output = Result<(), CrawlError>>,
{
    match super::guarded(component, fut).await {
        Ok(()) => trace!("{} hook of {} done", hook, component),
        Err(e) => error!(
            "{}",
            CrawlError::Lifecycle {
                component: component.to_string(),
                message: format!("{hook} failed: {e}"),
            }
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_tracker_needs_checks_and_timeout() {
        let mut idle = IdleTracker::new();
        idle.last_busy = Instant::now() - Duration::from_millis(10);
        idle.empty();
        idle.empty();
        assert!(!idle.exhausted(3, Duration::ZERO));
        idle.empty();
        assert!(idle.exhausted(3, Duration::ZERO));
        assert!(!idle.exhausted(3, Duration::from_secs(3600)));

        idle.busy();
        assert_eq!(idle.checks, 0);
        assert!(!idle.exhausted(1, Duration::ZERO));
    }

    #[test]
    fn idle_checks_saturate_during_a_long_timeout() {
        let mut idle = IdleTracker::new();
        idle.checks = u32::MAX - 1;
        idle.empty();
        idle.empty();
        assert_eq!(idle.checks, u32::MAX);
        assert!(!idle.exhausted(3, Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn stuck_workers_are_aborted_and_awaited() {
        let state = CrawlerState::new();
        let mut workers = JoinSet::new();

        let finishing = Arc::clone(&state);
        workers.spawn(async move {
            let _active = finishing.worker_started();
        });
        // Ignores cancellation entirely.
        let stuck = Arc::clone(&state);
        workers.spawn(async move {
            let _active = stuck.worker_started();
            std::future::pending::<()>().await;
        });

        let started = Instant::now();
        join_workers(&mut workers, Duration::from_millis(100)).await;

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(workers.is_empty());
        assert_eq!(state.active_workers(), 0);
    }
}
