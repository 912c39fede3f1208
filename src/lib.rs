//! # crawl-engine
//!
//! A bounded, backpressured crawl pipeline.
//!
//! Requests flow from seed [`Site`]s and an optional [`RequestSupplier`] into a
//! bounded [`RequestHolder`], are fetched and extracted by a pool of spider
//! workers, and the resulting [`Page`]s flow through a bounded [`PageHolder`]
//! to a chain of [`Exporter`]s. Every hand-off has a bounded wait, every stage
//! pauses when the next one fills up, and a [`Reserver`] keeps each request
//! from being crawled twice.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawl_engine::prelude::*;
//!
//! struct Titles;
//!
//! #[async_trait]
//! impl Extractor for Titles {
//!     async fn extract(&self, page: &mut Page) -> Result<(), CrawlError> {
//!         let text = page.text().unwrap_or_default();
//!         if let Some(start) = text.find("<title>") {
//!             let rest = &text[start + 7..];
//!             let title = rest.split("</title>").next().unwrap_or_default();
//!             page.add_item("title", title.trim());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! async fn run() -> Result<(), CrawlError> {
//!     let site = Site::new("example")
//!         .with_politeness_delay(std::time::Duration::from_millis(500))
//!         .with_start_url("https://example.com/");
//!
//!     let crawler = CrawlerBuilder::new()
//!         .add_site(site)
//!         .extractor(Titles)
//!         .add_exporter(ConsoleExporter::new())
//!         .build()?;
//!     crawler.crawl().await
//! }
//! ```

pub mod bloom_filter;
pub mod builder;
pub mod crawler;
pub mod error;
pub mod exporter;
pub mod extractor;
pub mod fetcher;
pub mod holder;
pub mod page;
pub mod prelude;
pub mod request;
pub mod reserver;
pub mod response;
pub mod site;
pub mod state;
pub mod stats;
pub mod supplier;

pub use builder::{CrawlerBuilder, CrawlerConfig};
pub use crawler::Crawler;
pub use error::{CrawlError, FetchError};
pub use exporter::{ConsoleExporter, Exporter, FileExporter, MemoryExporter};
pub use extractor::{Extractor, FnExtractor, LinkExtractor};
pub use fetcher::{Fetcher, FetcherRegistry, ReqwestFetcher};
pub use holder::{PageHolder, QueuePageHolder, QueueRequestHolder, RequestHolder};
pub use page::Page;
pub use request::{Method, Request};
pub use reserver::{BloomReserver, Reserver, SetReserver};
pub use response::Response;
pub use site::Site;
pub use state::{CrawlerStatus, Mode};
pub use stats::StatCollector;
pub use supplier::{IterSupplier, RequestSupplier};

pub use async_trait::async_trait;
pub use tokio;
