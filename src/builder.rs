//! # Builder Module
//!
//! Provides `CrawlerConfig` and the `CrawlerBuilder`, a fluent API for
//! assembling a [`Crawler`] from sites, a request supplier, collaborators and
//! tuning knobs.
//!
//! ## Overview
//!
//! The builder validates the assembly before any worker exists: at least one
//! request source (a site with seeds, or a supplier), at least one exporter,
//! and a thread budget that leaves room for a spider worker. A missing fetcher
//! or extractor is only a warning: the crawler then fetches with one
//! `reqwest` client per site and exports pages without items.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawl_engine::prelude::*;
//!
//! async fn run() -> Result<(), CrawlError> {
//!     let site = Site::new("docs").with_start_url("https://docs.example.com/");
//!     let crawler = CrawlerBuilder::new()
//!         .threads(8)
//!         .add_site(site)
//!         .extractor(LinkExtractor::new())
//!         .add_exporter(FileExporter::new("./out"))
//!         .build()?;
//!
//!     crawler.crawl().await
//! }
//! ```

use crate::error::CrawlError;
use crate::exporter::Exporter;
use crate::extractor::Extractor;
use crate::fetcher::{Fetcher, FetcherRegistry};
use crate::holder::{PageHolder, QueuePageHolder, QueueRequestHolder, RequestHolder};
use crate::reserver::{Reserver, SetReserver};
use crate::site::Site;
use crate::state::Mode;
use crate::supplier::RequestSupplier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::Crawler;

/// Tuning knobs of a crawl. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Size of the worker pool: one exporter worker, one supplier worker when
    /// a supplier is configured, and spider workers for the rest.
    pub threads: usize,
    pub mode: Mode,
    pub request_holder_capacity: usize,
    pub page_holder_capacity: usize,
    /// Producers pause while the request holder holds at least this many.
    pub request_holder_threshold: usize,
    pub request_holder_pause_ms: u64,
    /// Spider workers pause while the page holder holds at least this many.
    pub page_holder_threshold: usize,
    pub page_holder_pause_ms: u64,
    /// Exporter worker sleep after an empty pull; 0 disables it.
    pub exporter_pause_ms: u64,
    pub push_timeout_ms: u64,
    pub pull_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub idle_checks: u32,
    pub idle_timeout_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            threads: num_cpus::get().max(2),
            mode: Mode::Client,
            request_holder_capacity: 100_000,
            page_holder_capacity: 10_000,
            request_holder_threshold: 10_000,
            request_holder_pause_ms: 300,
            page_holder_threshold: 1_000,
            page_holder_pause_ms: 200,
            exporter_pause_ms: 30,
            push_timeout_ms: 200,
            pull_timeout_ms: 200,
            poll_interval_ms: 3_000,
            idle_checks: 3,
            idle_timeout_ms: 180_000,
        }
    }
}

impl CrawlerConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, CrawlError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn request_holder_pause(&self) -> Duration {
        Duration::from_millis(self.request_holder_pause_ms)
    }

    pub fn page_holder_pause(&self) -> Duration {
        Duration::from_millis(self.page_holder_pause_ms)
    }

    pub fn exporter_pause(&self) -> Duration {
        Duration::from_millis(self.exporter_pause_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Number of spider workers the thread budget leaves.
    pub fn spider_workers(&self, with_supplier: bool) -> usize {
        let reserved = 1 + usize::from(with_supplier);
        self.threads.saturating_sub(reserved)
    }

    pub(crate) fn validate(&self, with_supplier: bool) -> Result<(), CrawlError> {
        if self.threads < 2 {
            return Err(CrawlError::Configuration(format!(
                "threads must be at least 2, got {}",
                self.threads
            )));
        }
        if self.spider_workers(with_supplier) == 0 {
            return Err(CrawlError::Configuration(format!(
                "{} threads leave no room for a spider worker",
                self.threads
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(CrawlError::Configuration(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

enum Dedup {
    Default,
    Custom(Arc<dyn Reserver>),
    Disabled,
}

pub struct CrawlerBuilder {
    config: CrawlerConfig,
    sites: Vec<Site>,
    supplier: Option<Arc<dyn RequestSupplier>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    extractor: Option<Arc<dyn Extractor>>,
    exporters: Vec<Arc<dyn Exporter>>,
    dedup: Dedup,
    request_holder: Option<Arc<dyn RequestHolder>>,
    page_holder: Option<Arc<dyn PageHolder>>,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self {
            config: CrawlerConfig::default(),
            sites: Vec::new(),
            supplier: None,
            fetcher: None,
            extractor: None,
            exporters: Vec::new(),
            dedup: Dedup::Default,
            request_holder: None,
            page_holder: None,
        }
    }
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CrawlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn request_holder_capacity(mut self, capacity: usize) -> Self {
        self.config.request_holder_capacity = capacity;
        self
    }

    pub fn page_holder_capacity(mut self, capacity: usize) -> Self {
        self.config.page_holder_capacity = capacity;
        self
    }

    /// Fill level at which the supplier pauses, and for how long.
    pub fn request_holder_threshold(mut self, threshold: usize, pause: Duration) -> Self {
        self.config.request_holder_threshold = threshold;
        self.config.request_holder_pause_ms = millis(pause);
        self
    }

    /// Fill level at which spider workers pause, and for how long.
    pub fn page_holder_threshold(mut self, threshold: usize, pause: Duration) -> Self {
        self.config.page_holder_threshold = threshold;
        self.config.page_holder_pause_ms = millis(pause);
        self
    }

    pub fn exporter_pause(mut self, pause: Duration) -> Self {
        self.config.exporter_pause_ms = millis(pause);
        self
    }

    pub fn holder_timeouts(mut self, push: Duration, pull: Duration) -> Self {
        self.config.push_timeout_ms = millis(push);
        self.config.pull_timeout_ms = millis(pull);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = millis(interval);
        self
    }

    /// A CLIENT-mode crawl stops after `checks` consecutive empty polls
    /// spanning more than `timeout`.
    pub fn idle(mut self, checks: u32, timeout: Duration) -> Self {
        self.config.idle_checks = checks;
        self.config.idle_timeout_ms = millis(timeout);
        self
    }

    pub fn add_site(mut self, site: Site) -> Self {
        self.sites.push(site);
        self
    }

    pub fn add_sites(mut self, sites: impl IntoIterator<Item = Site>) -> Self {
        self.sites.extend(sites);
        self
    }

    pub fn supplier<S>(mut self, supplier: S) -> Self
    where
        S: RequestSupplier + 'static,
    {
        self.supplier = Some(Arc::new(supplier));
        self
    }

    pub fn fetcher<F>(mut self, fetcher: F) -> Self
    where
        F: Fetcher + 'static,
    {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn extractor<E>(mut self, extractor: E) -> Self
    where
        E: Extractor + 'static,
    {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn add_exporter<E>(mut self, exporter: E) -> Self
    where
        E: Exporter + 'static,
    {
        self.exporters.push(Arc::new(exporter));
        self
    }

    /// Adds an exporter the caller keeps a handle to.
    pub fn add_shared_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Deduplicates requests with `reserver` instead of the default exact set.
    pub fn reserver(mut self, reserver: Arc<dyn Reserver>) -> Self {
        self.dedup = Dedup::Custom(reserver);
        self
    }

    /// Lets the same request be crawled any number of times.
    pub fn without_dedup(mut self) -> Self {
        self.dedup = Dedup::Disabled;
        self
    }

    /// Uses a custom request holder. Capacity, timeouts and dedup settings
    /// are then up to that holder.
    pub fn request_holder(mut self, holder: Arc<dyn RequestHolder>) -> Self {
        self.request_holder = Some(holder);
        self
    }

    pub fn page_holder(mut self, holder: Arc<dyn PageHolder>) -> Self {
        self.page_holder = Some(holder);
        self
    }

    /// Validates the assembly and builds the `Crawler`.
    pub fn build(self) -> Result<Crawler, CrawlError> {
        let config = self.config;
        let with_supplier = self.supplier.is_some();
        config.validate(with_supplier)?;

        let mut sites = Vec::with_capacity(self.sites.len());
        for site in self.sites {
            if site.is_valid() {
                sites.push(Arc::new(site));
            } else {
                warn!("Ignoring site '{}': it has no name or no seeds", site.name());
            }
        }
        if sites.is_empty() && !with_supplier {
            return Err(CrawlError::Configuration(
                "no request source: add a site with seeds or a supplier".to_string(),
            ));
        }
        if self.exporters.is_empty() {
            return Err(CrawlError::Configuration(
                "at least one exporter is required".to_string(),
            ));
        }

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                warn!("No fetcher configured, using one reqwest client per site");
                Arc::new(FetcherRegistry::new()) as Arc<dyn Fetcher>
            }
        };
        if self.extractor.is_none() {
            warn!("No extractor configured, pages will carry no items or links");
        }

        let request_holder = match self.request_holder {
            Some(holder) => holder,
            None => {
                let holder = QueueRequestHolder::new(
                    config.request_holder_capacity,
                    config.push_timeout(),
                    config.pull_timeout(),
                );
                let holder = match self.dedup {
                    Dedup::Default => holder.with_reserver(Arc::new(SetReserver::new())),
                    Dedup::Custom(reserver) => holder.with_reserver(reserver),
                    Dedup::Disabled => holder,
                };
                Arc::new(holder) as Arc<dyn RequestHolder>
            }
        };
        let page_holder = self.page_holder.unwrap_or_else(|| {
            Arc::new(QueuePageHolder::new(
                config.page_holder_capacity,
                config.push_timeout(),
                config.pull_timeout(),
            ))
        });

        Ok(Crawler::new(
            config,
            sites,
            self.supplier,
            fetcher,
            self.extractor,
            self.exporters,
            request_holder,
            page_holder,
        ))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::MemoryExporter;
    use crate::supplier::IterSupplier;

    fn seeded_site() -> Site {
        Site::new("example").with_start_url("https://example.com/")
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = CrawlerConfig::default();
        assert!(config.threads >= 2);
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.request_holder_capacity, 100_000);
        assert_eq!(config.page_holder_capacity, 10_000);
        assert_eq!(config.request_holder_threshold, 10_000);
        assert_eq!(config.page_holder_threshold, 1_000);
        assert_eq!(config.exporter_pause(), Duration::from_millis(30));
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.idle_checks, 3);
        assert_eq!(config.idle_timeout(), Duration::from_secs(180));
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = CrawlerConfig::from_toml_str(
            r#"
            threads = 6
            mode = "server"
            idle_timeout_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.threads, 6);
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.idle_timeout_ms, 1000);
        assert_eq!(config.pull_timeout_ms, 200);

        assert!(matches!(
            CrawlerConfig::from_toml_str("threads = \"many\""),
            Err(CrawlError::Toml(_))
        ));
    }

    #[test]
    fn too_few_threads_is_rejected() {
        let err = CrawlerBuilder::new()
            .threads(1)
            .add_site(seeded_site())
            .add_exporter(MemoryExporter::new())
            .build()
            .err()
            .expect("build should fail");
        assert!(matches!(err, CrawlError::Configuration(_)));
    }

    #[test]
    fn supplier_needs_a_third_thread() {
        let build = |threads| {
            CrawlerBuilder::new()
                .threads(threads)
                .supplier(IterSupplier::new(Vec::new(), 10))
                .add_exporter(MemoryExporter::new())
                .build()
        };
        assert!(matches!(build(2), Err(CrawlError::Configuration(_))));
        assert!(build(3).is_ok());
    }

    #[test]
    fn a_request_source_is_required() {
        let err = CrawlerBuilder::new()
            .threads(2)
            .add_site(Site::new("empty"))
            .add_exporter(MemoryExporter::new())
            .build()
            .err()
            .expect("build should fail");
        assert!(matches!(err, CrawlError::Configuration(_)));
    }

    #[test]
    fn an_exporter_is_required() {
        let err = CrawlerBuilder::new()
            .threads(2)
            .add_site(seeded_site())
            .build()
            .err()
            .expect("build should fail");
        assert!(matches!(err, CrawlError::Configuration(_)));
    }

    #[test]
    fn worker_layout() {
        let config = CrawlerConfig {
            threads: 4,
            ..CrawlerConfig::default()
        };
        assert_eq!(config.spider_workers(false), 3);
        assert_eq!(config.spider_workers(true), 2);
    }
}
