//! The extract collaborator.
//!
//! An [`Extractor`] reads a fetched [`Page`] and fills it: items through
//! [`Page::add_item`], follow-up requests through [`Page::add_url`] or
//! [`Page::add_link`]. It may also set the page's skip flags. An error returned
//! from `extract` is logged by the spider worker and the partially filled page
//! continues down the pipeline.

use crate::error::CrawlError;
use crate::page::Page;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, page: &mut Page) -> Result<(), CrawlError>;

    async fn init(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// Wraps a synchronous closure as an [`Extractor`].
///
/// ```rust,ignore
/// let titles = FnExtractor::new(|page: &mut Page| {
///     let text = page.text().unwrap_or_default();
///     page.add_item("length", text.len());
///     Ok(())
/// });
/// ```
pub struct FnExtractor<F> {
    f: F,
}

impl<F> FnExtractor<F>
where
    F: Fn(&mut Page) -> Result<(), CrawlError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnExtractor { f }
    }
}

#[async_trait]
impl<F> Extractor for FnExtractor<F>
where
    F: Fn(&mut Page) -> Result<(), CrawlError> + Send + Sync,
{
    async fn extract(&self, page: &mut Page) -> Result<(), CrawlError> {
        (self.f)(page)
    }
}

// Quoted absolute or root-relative URLs, as found in href/src attributes or
// inline scripts.
#[allow(clippy::unwrap_used)]
static QUOTED_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']((?:https?://[\w.\-]+(?::\d+)?)?/[\w.\-~%/]*(?:\?[\w.&=%\-]*)?)(?:#[\w.\-]*)?["']"#)
        .unwrap()
});

/// Discovers follow-up links by scanning the page body for quoted URLs.
///
/// Every candidate goes through [`Page::add_url`], so only same-host http(s)
/// links that point to a different document are kept. An optional `allow`
/// pattern further restricts which absolute URLs are followed.
#[derive(Debug, Clone, Default)]
pub struct LinkExtractor {
    allow: Option<Regex>,
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(pattern: &str) -> Result<Self, CrawlError> {
        let allow = Regex::new(pattern)
            .map_err(|e| CrawlError::Configuration(format!("invalid link pattern: {e}")))?;
        Ok(LinkExtractor { allow: Some(allow) })
    }

    /// Candidate URLs in `content`, deduplicated, as written in the document.
    pub fn candidates(content: &str) -> BTreeSet<String> {
        QUOTED_URL_RE
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }
}

#[async_trait]
impl Extractor for LinkExtractor {
    async fn extract(&self, page: &mut Page) -> Result<(), CrawlError> {
        let Some(response) = page.response() else {
            return Ok(());
        };
        if !response.is_text() {
            return Ok(());
        }
        let base = response.url.clone();
        let content = response.text();
        for candidate in Self::candidates(&content) {
            let allowed = match (&self.allow, base.join(&candidate)) {
                (None, _) => true,
                (Some(allow), Ok(mut resolved)) => {
                    resolved.set_fragment(None);
                    allow.is_match(resolved.as_str())
                }
                (Some(_), Err(_)) => false,
            };
            if allowed {
                page.add_url(&candidate);
            }
        }
        Ok(())
    }
}
