//! The fetch collaborator and its default HTTP implementation.
//!
//! A [`Fetcher`] turns a [`Request`] into a [`Response`]. Failures come back as
//! a [`FetchError`], which the spider worker records on the page instead of
//! propagating.
//!
//! When no fetcher is configured, the crawler uses a [`FetcherRegistry`]: it
//! lazily builds one [`ReqwestFetcher`] per [`Site`] (keyed by site name) and
//! keeps it for the lifetime of the crawl run.

use crate::error::{CrawlError, FetchError};
use crate::request::Request;
use crate::response::Response;
use crate::site::{Site, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_RETRY_TIMES};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;

    async fn init(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// An HTTP fetcher backed by one `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    retry_times: u32,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::build(DEFAULT_CONNECTION_TIMEOUT, DEFAULT_RETRY_TIMES)
    }

    /// A fetcher tuned for one site: its connection timeout and retry budget.
    pub fn for_site(site: &Site) -> Result<Self, FetchError> {
        Self::build(site.timeout(), site.retry_times())
    }

    fn build(connect_timeout: Duration, retry_times: u32) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true)
            .build()?;
        Ok(ReqwestFetcher {
            client,
            retry_times,
        })
    }

    fn prepare(&self, request: &Request) -> Result<reqwest::RequestBuilder, FetchError> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.canonical_url());

        let mut headers = HeaderMap::new();
        for (name, value) in request.effective_headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| FetchError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(cookie) = cookie_header(request) {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| FetchError::InvalidRequest(format!("cookie: {e}")))?;
            headers.insert(COOKIE, value);
        }
        builder = builder.headers(headers);

        if !request.is_idempotent() {
            if let Some(body) = request.body() {
                builder = builder.body(body.clone());
            } else if !request.data().is_empty() {
                builder = builder.form(request.data());
            }
        }
        if let Some(timeout) = request.effective_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }

    async fn fetch_once(&self, request: &Request) -> Result<Response, FetchError> {
        let response = self.prepare(request)?.send().await?.error_for_status()?;

        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_of)
            .or_else(|| request.response_charset().map(str::to_string));
        let body = response.bytes().await?;

        let mut result = Response::new(url, status, body);
        for (name, value) in headers {
            result = result.with_header(name, value);
        }
        if let Some(charset) = charset {
            result = result.with_charset(charset);
        }
        Ok(result)
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if !request.is_valid() {
            return Err(FetchError::InvalidRequest(request.to_string()));
        }
        // Only connection-level failures of idempotent requests are retried.
        let attempts = if request.is_idempotent() {
            self.retry_times.max(1)
        } else {
            1
        };
        let mut attempt = 1;
        loop {
            match self.fetch_once(request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    debug!(
                        "Fetch attempt {}/{} for {} failed: {}",
                        attempt, attempts, request, e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn cookie_header(request: &Request) -> Option<String> {
    let site = request.site()?;
    if site.cookies().is_empty() {
        return None;
    }
    let mut pairs: Vec<_> = site
        .cookies()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    pairs.sort();
    Some(pairs.join("; "))
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Per-site [`ReqwestFetcher`]s, created on first use.
///
/// Requests without a site share one fetcher built with the default settings.
#[derive(Debug, Default)]
pub struct FetcherRegistry {
    fetchers: DashMap<String, Arc<ReqwestFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetcher_for(&self, request: &Request) -> Result<Arc<ReqwestFetcher>, FetchError> {
        let key = request.site().map(|s| s.name().to_string()).unwrap_or_default();
        if let Some(fetcher) = self.fetchers.get(&key) {
            return Ok(Arc::clone(fetcher.value()));
        }
        let fetcher = match request.site() {
            Some(site) => ReqwestFetcher::for_site(site)?,
            None => ReqwestFetcher::new()?,
        };
        debug!("Created fetcher for site '{}'", key);
        // Another worker may have raced us here; keep whichever landed first.
        let entry = self
            .fetchers
            .entry(key)
            .or_insert_with(|| Arc::new(fetcher));
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

#[async_trait]
impl Fetcher for FetcherRegistry {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let fetcher = self.fetcher_for(request)?;
        fetcher.fetch(request).await
    }

    async fn close(&self) -> Result<(), CrawlError> {
        if !self.fetchers.is_empty() {
            info!("Releasing {} site fetcher(s)", self.fetchers.len());
        }
        self.fetchers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_is_read_from_content_type() {
        assert_eq!(
            charset_of("text/html; charset=GBK").as_deref(),
            Some("GBK")
        );
        assert_eq!(
            charset_of("text/html;Charset=\"utf-8\"").as_deref(),
            Some("utf-8")
        );
        assert_eq!(charset_of("text/html"), None);
    }

    #[test]
    fn cookies_become_one_header() {
        let site = Arc::new(
            Site::new("shop")
                .with_cookie("b", "2")
                .with_cookie("a", "1")
                .with_start_url("https://shop.example.com/"),
        );
        let request = site.start_requests().remove(0);
        assert_eq!(cookie_header(&request).as_deref(), Some("a=1; b=2"));

        let bare = Request::parse("https://example.com/").unwrap();
        assert_eq!(cookie_header(&bare), None);
    }

    #[test]
    fn registry_caches_one_fetcher_per_site() {
        let registry = FetcherRegistry::new();
        let news = Arc::new(Site::new("news").with_start_url("https://news.example.com/"));
        let shop = Arc::new(Site::new("shop").with_start_url("https://shop.example.com/"));

        let a = news.start_requests().remove(0);
        let b = a.derive(url::Url::parse("https://news.example.com/2").unwrap());
        let c = shop.start_requests().remove(0);

        let fa = registry.fetcher_for(&a).unwrap();
        let fb = registry.fetcher_for(&b).unwrap();
        registry.fetcher_for(&c).unwrap();
        assert!(Arc::ptr_eq(&fa, &fb));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn close_releases_fetchers() {
        let registry = FetcherRegistry::new();
        registry
            .fetcher_for(&Request::parse("https://example.com/").unwrap())
            .unwrap();
        assert_eq!(registry.len(), 1);
        registry.close().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_are_not_sent() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let request = Request::new(url::Url::parse("ftp://example.com/").unwrap());
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }
}
