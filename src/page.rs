//! The result of one fetch + extract cycle.
//!
//! A [`Page`] is created by a spider worker for every request it pulls, filled
//! by the fetcher (response or error) and the extractor (items and follow-up
//! links), and finally consumed by the exporter chain.

use crate::error::FetchError;
use crate::request::{Method, Request};
use crate::response::Response;
use crate::site::Site;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use url::Url;

pub struct Page {
    request: Request,
    response: Option<Response>,
    error: Option<FetchError>,
    items: Map<String, Value>,
    links: Vec<Request>,
    skip_items: bool,
    skip_links: bool,
}

impl Page {
    pub fn new(request: Request) -> Self {
        Page {
            request,
            response: None,
            error: None,
            items: Map::new(),
            links: Vec::new(),
            skip_items: false,
            skip_links: false,
        }
    }

    /// Builds a page from a fetch outcome.
    pub fn from_fetch(request: Request, outcome: Result<Response, FetchError>) -> Self {
        let mut page = Page::new(request);
        match outcome {
            Ok(response) => page.response = Some(response),
            Err(e) => page.error = Some(e),
        }
        page
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    pub fn site(&self) -> Option<&Arc<Site>> {
        self.request.site()
    }

    pub fn url(&self) -> &Url {
        self.request.url()
    }

    pub fn signature(&self) -> Option<&str> {
        self.request.signature()
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Raw body as text, if a response exists.
    pub fn text(&self) -> Option<String> {
        self.response.as_ref().map(Response::text)
    }

    /// True when the fetch failed or produced nothing usable. An empty body
    /// only counts as usable for HEAD requests.
    pub fn has_error(&self) -> bool {
        if self.error.is_some() {
            return true;
        }
        match &self.response {
            None => true,
            Some(response) => {
                !response.has_content() && *self.request.method() != Method::HEAD
            }
        }
    }

    pub fn add_item(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.items.insert(key.into(), value.into());
        self
    }

    pub fn item(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    pub fn items(&self) -> &Map<String, Value> {
        &self.items
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn set_skip_items(&mut self, skip: bool) -> &mut Self {
        self.skip_items = skip;
        self
    }

    pub fn skip_items(&self) -> bool {
        self.skip_items
    }

    pub fn set_skip_links(&mut self, skip: bool) -> &mut Self {
        self.skip_links = skip;
        self
    }

    pub fn skip_links(&self) -> bool {
        self.skip_links
    }

    /// Adds a follow-up link discovered on this page.
    ///
    /// The URL is resolved against the page URL and kept only if it is
    /// http(s), stays on the same host, and is not an anchor into this same
    /// page. The new request inherits this page's request settings.
    pub fn add_url(&mut self, url: &str) -> bool {
        let base = self
            .response
            .as_ref()
            .map(|r| &r.url)
            .unwrap_or_else(|| self.request.url());
        let resolved = match base.join(url.trim()) {
            Ok(resolved) if !url.trim().is_empty() => resolved,
            _ => return false,
        };
        if !is_followable(base, &resolved) {
            return false;
        }
        let link = self.request.derive(resolved);
        self.links.push(link);
        true
    }

    /// Adds every URL in `urls`, returning how many were accepted.
    pub fn add_urls<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter(|url| self.add_url(url.as_ref()))
            .count()
    }

    /// Adds a fully-formed follow-up request, overlaid on this page's request.
    pub fn add_link(&mut self, request: Request) -> bool {
        if !request.is_valid() {
            return false;
        }
        let link = self.request.merge(request);
        self.links.push(link);
        true
    }

    pub fn add_links(&mut self, requests: impl IntoIterator<Item = Request>) -> usize {
        requests
            .into_iter()
            .filter_map(|request| self.add_link(request).then_some(()))
            .count()
    }

    pub fn links(&self) -> &[Request] {
        &self.links
    }

    pub fn take_links(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.links)
    }
}

fn is_followable(base: &Url, candidate: &Url) -> bool {
    if !matches!(candidate.scheme(), "http" | "https") {
        return false;
    }
    let same_host = match (base.host_str(), candidate.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    if !same_host {
        return false;
    }
    let same_document = base.path().eq_ignore_ascii_case(candidate.path())
        && base.query().unwrap_or_default() == candidate.query().unwrap_or_default();
    !same_document
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("request", &self.request)
            .field("status", &self.status())
            .field("error", &self.error)
            .field("items", &self.items.len())
            .field("links", &self.links.len())
            .field("skip_items", &self.skip_items)
            .field("skip_links", &self.skip_links)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str) -> Page {
        let request = Request::parse(url).unwrap();
        let response = Response::new(request.url().clone(), 200, "<html></html>");
        Page::new(request).with_response(response)
    }

    #[test]
    fn error_conditions() {
        let request = Request::parse("https://example.com/").unwrap();
        assert!(Page::new(request.clone()).has_error());

        let failed = Page::from_fetch(request.clone(), Err(FetchError::Timeout("x".into())));
        assert!(failed.has_error());

        let empty = Page::new(request.clone())
            .with_response(Response::new(request.url().clone(), 200, ""));
        assert!(empty.has_error());

        let head = request.clone().with_method(Method::HEAD);
        let head_page =
            Page::new(head).with_response(Response::new(request.url().clone(), 200, ""));
        assert!(!head_page.has_error());

        assert!(!page("https://example.com/").has_error());
    }

    #[test]
    fn add_url_resolves_and_filters() {
        let mut p = page("https://example.com/list?page=1");
        assert!(p.add_url("/item/1"));
        assert!(p.add_url("https://EXAMPLE.com/item/2"));
        assert!(p.add_url("list?page=2"));
        assert!(!p.add_url("https://other.org/item/3"));
        assert!(!p.add_url("#comments"));
        assert!(!p.add_url("?page=1"));
        assert!(!p.add_url("mailto:a@example.com"));
        assert!(!p.add_url(""));
        let urls: Vec<_> = p.links().iter().map(|r| r.url().as_str().to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/item/1",
                "https://example.com/item/2",
                "https://example.com/list?page=2",
            ]
        );
    }

    #[test]
    fn add_link_inherits_parent_signature() {
        let mut p = Page::new(
            Request::parse("https://example.com/")
                .unwrap()
                .with_signature("news"),
        );
        assert!(p.add_link(Request::parse("https://example.com/a").unwrap()));
        assert!(!p.add_link(Request::new(Url::parse("data:text/plain,hi").unwrap())));
        assert_eq!(p.links().len(), 1);
        assert_eq!(p.links()[0].signature(), Some("news"));
    }

    #[test]
    fn items_and_skip_flags() {
        let mut p = page("https://example.com/");
        p.add_item("title", "Hello").add_item("score", 42);
        assert_eq!(p.item("title"), Some(&Value::from("Hello")));
        assert_eq!(p.items().len(), 2);
        p.set_skip_items(true).set_skip_links(true);
        assert!(p.skip_items() && p.skip_links());
    }
}
