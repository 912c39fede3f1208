//! The export collaborator and the exporters shipped with the crate.
//!
//! Every page that reaches the page holder is handed to each configured
//! [`Exporter`] in order. An exporter that fails is logged and skipped; the
//! remaining exporters still see the page.
//!
//! ## Key Components
//!
//! - **`MemoryExporter`**: keeps a snapshot of every exported page in memory.
//! - **`ConsoleExporter`**: logs each page's items as one JSON line.
//! - **`FileExporter`**: appends items as JSON lines, one file per request
//!   signature.

use crate::error::CrawlError;
use crate::page::Page;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use url::Url;

/// File name used by [`FileExporter`] for pages without a signature.
pub const DEFAULT_OUTPUT_NAME: &str = "output";

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Name used in logs and export errors.
    fn name(&self) -> &str;

    async fn export(&self, page: &Page) -> Result<(), CrawlError>;

    async fn init(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// What [`MemoryExporter`] keeps from each page.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedPage {
    pub url: Url,
    pub signature: Option<String>,
    pub status: Option<u16>,
    pub items: Map<String, Value>,
}

impl From<&Page> for ExportedPage {
    fn from(page: &Page) -> Self {
        ExportedPage {
            url: page.url().clone(),
            signature: page.signature().map(str::to_string),
            status: page.status(),
            items: page.items().clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryExporter {
    pages: Mutex<Vec<ExportedPage>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(&self) -> Vec<ExportedPage> {
        self.pages.lock().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.pages
            .lock()
            .iter()
            .map(|p| p.url.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

#[async_trait]
impl Exporter for MemoryExporter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn export(&self, page: &Page) -> Result<(), CrawlError> {
        self.pages.lock().push(ExportedPage::from(page));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConsoleExporter;

impl ConsoleExporter {
    pub fn new() -> Self {
        ConsoleExporter
    }
}

#[async_trait]
impl Exporter for ConsoleExporter {
    fn name(&self) -> &str {
        "console"
    }

    async fn export(&self, page: &Page) -> Result<(), CrawlError> {
        let line = serde_json::to_string(page.items())?;
        info!("{} {}", page.url(), line);
        Ok(())
    }
}

/// Appends each page's items as a JSON line to `<dir>/<signature>`.
///
/// Pages without items are skipped. Writers are opened lazily in append mode
/// and flushed on [`Exporter::close`].
#[derive(Debug)]
pub struct FileExporter {
    dir: PathBuf,
    writers: tokio::sync::Mutex<HashMap<String, BufWriter<File>>>,
}

impl FileExporter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        FileExporter {
            dir: dir.as_ref().to_path_buf(),
            writers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(page: &Page) -> String {
        match page.signature() {
            Some(signature) if !signature.trim().is_empty() => signature
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
                .collect(),
            _ => DEFAULT_OUTPUT_NAME.to_string(),
        }
    }
}

#[async_trait]
impl Exporter for FileExporter {
    fn name(&self) -> &str {
        "file"
    }

    async fn init(&self) -> Result<(), CrawlError> {
        match fs::metadata(&self.dir).await {
            Ok(meta) if !meta.is_dir() => Err(CrawlError::Configuration(format!(
                "{} is not a directory",
                self.dir.display()
            ))),
            Ok(_) => Ok(()),
            Err(_) => {
                fs::create_dir_all(&self.dir).await?;
                debug!("Created export directory {}", self.dir.display());
                Ok(())
            }
        }
    }

    async fn export(&self, page: &Page) -> Result<(), CrawlError> {
        if !page.has_items() {
            return Ok(());
        }
        let mut line = serde_json::to_vec(page.items())?;
        line.push(b'\n');

        let name = Self::file_name(page);
        let mut writers = self.writers.lock().await;
        if !writers.contains_key(&name) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(&name))
                .await
                .map_err(|e| CrawlError::export(self.name(), format!("open {name}: {e}")))?;
            writers.insert(name.clone(), BufWriter::new(file));
        }
        if let Some(writer) = writers.get_mut(&name) {
            writer.write_all(&line).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlError> {
        let mut writers = self.writers.lock().await;
        for (name, writer) in writers.iter_mut() {
            writer
                .flush()
                .await
                .map_err(|e| CrawlError::export("file", format!("flush {name}: {e}")))?;
        }
        writers.clear();
        Ok(())
    }
}
