//! A "prelude" for users of the `crawl-engine` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that
//! they can be easily imported.
//!
//! # Example
//!
//! ```
//! use crawl_engine::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawler,
    CrawlerBuilder,
    CrawlerConfig,
    CrawlerStatus,
    Mode,
    Page,
    Request,
    Response,
    Site,
    // Collaborator traits
    Exporter,
    Extractor,
    Fetcher,
    RequestSupplier,
    Reserver,
    // Shipped collaborators
    BloomReserver,
    ConsoleExporter,
    FileExporter,
    FnExtractor,
    IterSupplier,
    LinkExtractor,
    MemoryExporter,
    SetReserver,
    // Errors
    CrawlError,
    FetchError,
    // Essential re-export for trait implementation
    async_trait,
};
