//! # Exporter Worker Module
//!
//! Drains the page holder and hands each page to every exporter in order. A
//! failing (or panicking) exporter is logged and counted; the next exporter
//! still receives the page.

use super::{guarded, pause};
use crate::exporter::Exporter;
use crate::holder::PageHolder;
use crate::page::Page;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use log::{debug, error, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct ExporterWorker {
    pub(crate) page_holder: Arc<dyn PageHolder>,
    pub(crate) exporters: Arc<Vec<Arc<dyn Exporter>>>,
    pub(crate) pause: Duration,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) stats: Arc<StatCollector>,
    pub(crate) token: CancellationToken,
}

impl ExporterWorker {
    pub(crate) async fn run(self) {
        let _active = self.state.worker_started();
        debug!("Exporter worker started with {} exporter(s)", self.exporters.len());

        while !self.token.is_cancelled() {
            match self.page_holder.pull().await {
                Some(page) => self.export(&page).await,
                None => {
                    if !self.pause.is_zero() {
                        pause(&self.token, self.pause).await;
                    }
                }
            }
        }

        debug!("Exporter worker stopped");
    }

    async fn export(&self, page: &Page) {
        trace!("Exporting {}", page.request());
        for exporter in self.exporters.iter() {
            if let Err(e) = guarded(exporter.name(), exporter.export(page)).await {
                error!("Exporter '{}' failed on {}: {}", exporter.name(), page.url(), e);
                self.stats.increment_export_errors();
            }
        }
        self.stats.increment_pages_exported();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrawlError;
    use crate::exporter::MemoryExporter;
    use crate::request::Request;
    use crate::response::Response;
    use async_trait::async_trait;

    struct FailingExporter {
        panic: bool,
    }

    #[async_trait]
    impl Exporter for FailingExporter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn export(&self, _page: &Page) -> Result<(), CrawlError> {
            if self.panic {
                panic!("exporter bug");
            }
            Err(CrawlError::export("failing", "disk full"))
        }
    }

    fn page(path: &str) -> Page {
        let request = Request::parse(&format!("https://example.com{path}")).unwrap();
        let response = Response::new(request.url().clone(), 200, "body");
        Page::new(request).with_response(response)
    }

    #[tokio::test]
    async fn a_failing_exporter_does_not_block_the_next() {
        let first = Arc::new(MemoryExporter::new());
        let last = Arc::new(MemoryExporter::new());
        let stats = Arc::new(StatCollector::new());
        let worker = ExporterWorker {
            page_holder: Arc::new(crate::holder::QueuePageHolder::default()),
            exporters: Arc::new(vec![
                first.clone() as Arc<dyn Exporter>,
                Arc::new(FailingExporter { panic: false }),
                Arc::new(FailingExporter { panic: true }),
                last.clone() as Arc<dyn Exporter>,
            ]),
            pause: Duration::ZERO,
            state: CrawlerState::new(),
            stats: stats.clone(),
            token: CancellationToken::new(),
        };

        worker.export(&page("/a")).await;
        worker.export(&page("/b")).await;

        assert_eq!(first.len(), 2);
        assert_eq!(last.len(), 2);
        assert_eq!(stats.pages_exported(), 2);
        assert_eq!(
            stats.export_errors.load(std::sync::atomic::Ordering::SeqCst),
            4
        );
    }
}
