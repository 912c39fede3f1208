//! The unit of fetch work flowing through the pipeline.
//!
//! A [`Request`] carries everything the fetch collaborator needs (URL, method,
//! headers, form data, body, timeout) plus pipeline metadata: a *signature*
//! grouping requests into an output class, a *priority* hint, and a shared
//! reference to the [`Site`] it belongs to.
//!
//! Deduplication keys on [`Request::identity`]: idempotent requests (GET, HEAD)
//! are identified by their canonical URL with form data folded into the query;
//! other methods by their full content.

use crate::error::CrawlError;
use crate::site::Site;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use reqwest::Method;

#[derive(Clone)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HashMap<String, String>,
    data: BTreeMap<String, String>,
    body: Option<Bytes>,
    request_charset: Option<String>,
    response_charset: Option<String>,
    timeout: Option<Duration>,
    signature: Option<String>,
    priority: i32,
    site: Option<Arc<Site>>,
}

impl Request {
    /// Creates a GET request. The URL fragment is dropped.
    pub fn new(mut url: Url) -> Self {
        url.set_fragment(None);
        Request {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            data: BTreeMap::new(),
            body: None,
            request_charset: None,
            response_charset: None,
            timeout: None,
            signature: None,
            priority: 0,
            site: None,
        }
    }

    /// Parses `url` and creates a GET request, rejecting anything but http(s).
    pub fn parse(url: &str) -> Result<Self, CrawlError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(CrawlError::InvalidRequest("empty url".to_string()));
        }
        let request = Request::new(Url::parse(trimmed)?);
        if !request.is_valid() {
            return Err(CrawlError::InvalidRequest(format!(
                "unsupported url '{}'",
                trimmed
            )));
        }
        Ok(request)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.headers.insert(name, value.into());
        }
        self
    }

    /// Adds a form field: query parameter for GET/HEAD, form body otherwise.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.data.insert(key, value.into());
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Blank signatures are ignored.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        let signature = signature.into();
        if !signature.trim().is_empty() {
            self.signature = Some(signature);
        }
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
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

    pub fn with_site(mut self, site: Arc<Site>) -> Self {
        self.site = Some(site);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Headers set on this request only; see [`Request::effective_headers`].
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn site(&self) -> Option<&Arc<Site>> {
        self.site.as_ref()
    }

    /// Site headers overlaid with this request's own headers.
    pub fn effective_headers(&self) -> HashMap<String, String> {
        let mut merged = self
            .site
            .as_ref()
            .map(|site| site.headers().clone())
            .unwrap_or_default();
        merged.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// The request's own timeout, else its site's connection timeout.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout
            .or_else(|| self.site.as_ref().map(|site| site.timeout()))
    }

    pub fn request_charset(&self) -> Option<&str> {
        self.request_charset
            .as_deref()
            .or_else(|| self.site.as_ref().and_then(|site| site.request_charset()))
    }

    pub fn response_charset(&self) -> Option<&str> {
        self.response_charset
            .as_deref()
            .or_else(|| self.site.as_ref().and_then(|site| site.response_charset()))
    }

    /// Pause to apply after fetching this request; zero without a site.
    pub fn politeness_delay(&self) -> Duration {
        self.site
            .as_ref()
            .map(|site| site.politeness_delay())
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_idempotent(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// An absolute http(s) URL with a host.
    pub fn is_valid(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
            && self.url.host_str().is_some_and(|host| !host.is_empty())
    }

    /// The URL actually requested: for GET/HEAD the form data is appended
    /// to the query string.
    pub fn canonical_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_fragment(None);
        if self.is_idempotent() && !self.data.is_empty() {
            url.query_pairs_mut().extend_pairs(self.data.iter());
        }
        url
    }

    /// The deduplication key.
    pub fn identity(&self) -> String {
        let canonical = self.canonical_url();
        if self.is_idempotent() {
            return canonical.into();
        }
        let form = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.data.iter())
            .finish();
        let body = self
            .body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        format!("{} {}\n{}\n{}", self.method, canonical, form, body)
    }

    /// A new GET-style request for `url` that inherits this request's
    /// method, headers, signature, priority, charsets, timeout and site.
    /// Form data and body are not inherited.
    pub fn derive(&self, url: Url) -> Request {
        let mut derived = Request::new(url);
        derived.method = self.method.clone();
        derived.headers = self.headers.clone();
        derived.request_charset = self.request_charset.clone();
        derived.response_charset = self.response_charset.clone();
        derived.timeout = self.timeout;
        derived.signature = self.signature.clone();
        derived.priority = self.priority;
        derived.site = self.site.clone();
        derived
    }

    /// Overlays `child` on this request used as a template: the child's
    /// settings win wherever it has any.
    pub fn merge(&self, child: Request) -> Request {
        let mut headers = self.headers.clone();
        headers.extend(child.headers);
        Request {
            url: child.url,
            method: child.method,
            headers,
            data: child.data,
            body: child.body,
            request_charset: child.request_charset.or_else(|| self.request_charset.clone()),
            response_charset: child
                .response_charset
                .or_else(|| self.response_charset.clone()),
            timeout: child.timeout.or(self.timeout),
            signature: child.signature.or_else(|| self.signature.clone()),
            priority: if child.priority != 0 {
                child.priority
            } else {
                self.priority
            },
            site: child.site.or_else(|| self.site.clone()),
        }
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("site", &self.site.as_ref().map(|s| s.name().to_string()))
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("data", &self.data)
            .field("timeout", &self.timeout)
            .field("signature", &self.signature)
            .field("priority", &self.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    #[test]
    fn parse_rejects_empty_and_non_http() {
        assert!(Request::parse("").is_err());
        assert!(Request::parse("   ").is_err());
        assert!(Request::parse("mailto:someone@example.com").is_err());
        assert!(Request::parse("ftp://example.com/").is_err());
        assert!(Request::parse("http://example.com/").is_ok());
    }

    #[test]
    fn new_with_non_http_url_is_invalid() {
        let request = Request::new(Url::parse("file:///etc/hosts").unwrap());
        assert!(!request.is_valid());
    }

    #[test]
    fn get_identity_is_canonical_url() {
        let a = req("https://example.com/list?page=1#top");
        let b = req("https://example.com/list?page=1");
        assert_eq!(a.identity(), "https://example.com/list?page=1");
        assert_eq!(a, b);
    }

    #[test]
    fn get_identity_folds_form_data_into_query() {
        let a = req("https://example.com/search").with_data("q", "rust lang");
        assert_eq!(a.identity(), "https://example.com/search?q=rust+lang");
        let b = req("https://example.com/search?q=rust+lang");
        assert_eq!(a, b);
    }

    #[test]
    fn non_idempotent_identity_uses_full_content() {
        let a = req("https://example.com/api")
            .with_method(Method::POST)
            .with_data("id", "1");
        let b = req("https://example.com/api")
            .with_method(Method::POST)
            .with_data("id", "2");
        let c = req("https://example.com/api")
            .with_method(Method::POST)
            .with_data("id", "1");
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_ne!(a.identity(), req("https://example.com/api").identity());
    }

    #[test]
    fn effective_settings_fall_back_to_site() {
        let site = Arc::new(
            Site::new("s")
                .with_header("User-Agent", "site-agent")
                .with_header("Accept", "text/html")
                .with_timeout(Duration::from_secs(7))
                .with_response_charset("gbk"),
        );
        let request = req("https://example.com/")
            .with_header("User-Agent", "request-agent")
            .with_site(site);
        let headers = request.effective_headers();
        assert_eq!(headers["User-Agent"], "request-agent");
        assert_eq!(headers["Accept"], "text/html");
        assert_eq!(request.effective_timeout(), Some(Duration::from_secs(7)));
        assert_eq!(request.response_charset(), Some("gbk"));
        assert_eq!(
            request.clone().with_timeout(Duration::from_secs(1)).effective_timeout(),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn derive_inherits_metadata_but_not_data() {
        let site = Arc::new(Site::new("s"));
        let parent = req("https://example.com/list")
            .with_data("page", "2")
            .with_signature("articles")
            .with_priority(5)
            .with_site(site);
        let child = parent.derive(Url::parse("https://example.com/item/9").unwrap());
        assert_eq!(child.signature(), Some("articles"));
        assert_eq!(child.priority(), 5);
        assert!(child.data().is_empty());
        assert_eq!(child.site().map(|s| s.name()), Some("s"));
    }

    #[test]
    fn merge_prefers_child_settings() {
        let parent = req("https://example.com/")
            .with_header("A", "parent")
            .with_header("B", "parent")
            .with_signature("parent-sig")
            .with_priority(1);
        let child = req("https://example.com/next")
            .with_header("A", "child")
            .with_priority(9);
        let merged = parent.merge(child);
        assert_eq!(merged.url().as_str(), "https://example.com/next");
        assert_eq!(merged.headers()["A"], "child");
        assert_eq!(merged.headers()["B"], "parent");
        assert_eq!(merged.signature(), Some("parent-sig"));
        assert_eq!(merged.priority(), 9);
    }
}
