//! # Spider Worker Module
//!
//! One spider worker runs the fetch and extract cycle for a single request at
//! a time:
//!
//! 1. pause while the page holder is at or above its threshold,
//! 2. pull a request (bounded wait) and drop it if invalid,
//! 3. fetch it, recording any failure on the page,
//! 4. drop errored pages; otherwise extract, enqueue follow-ups and queue
//!    the page for export (each step honoring the page's skip flags),
//! 5. sleep the site's politeness delay.
//!
//! Nothing is retried here. Every drop is logged and counted.

use super::{guarded, pause};
use crate::error::FetchError;
use crate::extractor::Extractor;
use crate::fetcher::Fetcher;
use crate::holder::{PageHolder, RequestHolder};
use crate::page::Page;
use crate::request::Request;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct SpiderWorker {
    pub(crate) id: usize,
    pub(crate) request_holder: Arc<dyn RequestHolder>,
    pub(crate) page_holder: Arc<dyn PageHolder>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) extractor: Option<Arc<dyn Extractor>>,
    pub(crate) page_threshold: usize,
    pub(crate) pause: Duration,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) stats: Arc<StatCollector>,
    pub(crate) token: CancellationToken,
}

impl SpiderWorker {
    pub(crate) async fn run(self) {
        let _active = self.state.worker_started();
        debug!("Spider worker {} started", self.id);

        while !self.token.is_cancelled() {
            if self.page_holder.size() >= self.page_threshold {
                warn!(
                    "Page holder at {} (threshold {}), spider worker {} pausing for {:?}",
                    self.page_holder.size(),
                    self.page_threshold,
                    self.id,
                    self.pause
                );
                pause(&self.token, self.pause).await;
                continue;
            }

            let Some(request) = self.request_holder.pull().await else {
                continue;
            };
            if !request.is_valid() {
                debug!("Dropping invalid request {}", request);
                self.stats.increment_requests_dropped();
                continue;
            }

            let politeness = request.politeness_delay();
            self.crawl(request).await;
            if !politeness.is_zero() {
                pause(&self.token, politeness).await;
            }
        }

        debug!("Spider worker {} stopped", self.id);
    }

    async fn crawl(&self, request: Request) {
        trace!("Spider worker {} fetching {}", self.id, request);
        let fetch = async { Ok(self.fetcher.fetch(&request).await) };
        let outcome = match guarded("fetcher", fetch).await {
            Ok(outcome) => outcome,
            Err(e) => Err(FetchError::Other(anyhow::anyhow!(e.to_string()))),
        };
        self.stats.increment_pages_fetched();
        match &outcome {
            Ok(response) => self.stats.record_response_status(response.status),
            Err(e) => {
                if let Some(status) = e.status() {
                    self.stats.record_response_status(status);
                }
                error!("Fetch failed for {}: {}", request, e);
            }
        }

        let mut page = Page::from_fetch(request, outcome);
        if page.has_error() {
            debug!("Dropping errored page {}", page.request());
            self.stats.increment_pages_failed();
            return;
        }

        if let Some(extractor) = &self.extractor {
            if let Err(e) = guarded("extractor", extractor.extract(&mut page)).await {
                error!("Extraction failed for {}: {}", page.request(), e);
                self.stats.increment_extract_errors();
            }
        }

        if !page.skip_links() {
            for link in page.take_links() {
                let url = link.url().to_string();
                if self.request_holder.push(link).await {
                    self.stats.increment_requests_discovered();
                } else {
                    debug!("Follow-up request {} was not enqueued", url);
                    self.stats.increment_requests_dropped();
                }
            }
        }

        if page.skip_items() {
            trace!("Skipping items of {}", page.request());
            return;
        }
        let url = page.url().to_string();
        if self.page_holder.push(page).await {
            self.stats.increment_pages_queued();
        } else {
            warn!("Page {} was not queued for export", url);
            self.stats.increment_pages_dropped();
        }
    }
}
