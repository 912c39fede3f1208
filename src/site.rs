//! Per-target configuration shared by every request of one logical site.

use crate::request::Request;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_RETRY_TIMES: u32 = 3;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_POLITENESS_DELAY: Duration = Duration::from_millis(200);

/// Shared, mostly-immutable settings for one crawl target.
///
/// A `Site` is built by value, then frozen in an `Arc` when it is registered on
/// the [`CrawlerBuilder`](crate::builder::CrawlerBuilder). Seed requests are
/// stored without a back-reference and receive one in [`Site::start_requests`].
#[derive(Debug, Clone)]
pub struct Site {
    name: String,
    domain: Option<String>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    request_charset: Option<String>,
    response_charset: Option<String>,
    retry_times: u32,
    timeout: Duration,
    politeness_delay: Duration,
    seeds: Vec<Request>,
}

impl Site {
    pub fn new(name: impl Into<String>) -> Self {
        Site {
            name: name.into(),
            domain: None,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            request_charset: None,
            response_charset: None,
            retry_times: DEFAULT_RETRY_TIMES,
            timeout: DEFAULT_CONNECTION_TIMEOUT,
            politeness_delay: DEFAULT_POLITENESS_DELAY,
            seeds: Vec::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.headers.insert(name, value.into());
        }
        self
    }

    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.with_header("User-Agent", user_agent)
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.cookies.insert(name, value.into());
        }
        self
    }

    pub fn with_request_charset(mut self, charset: impl Into<String>) -> Self {
        self.request_charset = Some(charset.into());
        self
    }

    pub fn with_response_charset(mut self, charset: impl Into<String>) -> Self {
        self.response_charset = Some(charset.into());
        self
    }

    /// Retry count for the fetcher. Values below one are ignored.
    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        if retry_times > 0 {
            self.retry_times = retry_times;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause applied by a spider worker after each fetch for this site.
    /// `Duration::ZERO` disables it.
    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    /// Adds a seed request; invalid requests are ignored.
    pub fn with_start_request(mut self, request: Request) -> Self {
        if request.is_valid() {
            self.seeds.push(request);
        } else {
            warn!("Ignoring invalid start request for site '{}': {}", self.name, request);
        }
        self
    }

    /// Adds a seed URL; unparsable or non-http(s) URLs are ignored.
    pub fn with_start_url(self, url: &str) -> Self {
        match Request::parse(url) {
            Ok(request) => self.with_start_request(request),
            Err(e) => {
                warn!("Ignoring start url '{}' for site '{}': {}", url, self.name, e);
                self
            }
        }
    }

    pub fn with_start_urls<I, S>(self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .fold(self, |site, url| site.with_start_url(url.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn request_charset(&self) -> Option<&str> {
        self.request_charset.as_deref()
    }

    pub fn response_charset(&self) -> Option<&str> {
        self.response_charset.as_deref()
    }

    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    pub fn seed_count(&self) -> usize {
        self.seeds.len()
    }

    /// A site needs a non-blank name and at least one seed request.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.seeds.is_empty()
    }

    /// The seed requests, each bound to this site.
    pub fn start_requests(self: &Arc<Self>) -> Vec<Request> {
        self.seeds
            .iter()
            .cloned()
            .map(|request| request.with_site(Arc::clone(self)))
            .collect()
    }
}

impl PartialEq for Site {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Site {}
