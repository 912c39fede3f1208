//! The fetch collaborator's result for one request.

use bytes::Bytes;
use std::collections::HashMap;
use url::Url;

#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after any redirects the fetcher followed.
    pub url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub charset: Option<String>,
}

impl Response {
    pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Response {
            url,
            status,
            headers: HashMap::new(),
            body: body.into(),
            charset: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Header lookup; names are stored lowercase.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn has_content(&self) -> bool {
        !self.body.is_empty()
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Without a content type the body is assumed to be text.
    pub fn is_text(&self) -> bool {
        match self.content_type() {
            None => true,
            Some(ct) => {
                ct.trim_start().starts_with("text/") || self.is_xml() || self.is_json()
            }
        }
    }

    pub fn is_html(&self) -> bool {
        self.content_type_matches(|ct| ct.starts_with("text/html"))
    }

    pub fn is_xml(&self) -> bool {
        self.content_type_matches(|ct| {
            let essence = ct.split(';').next().unwrap_or_default();
            (essence.starts_with("application/") || essence.starts_with("text/"))
                && essence.ends_with("xml")
        })
    }

    pub fn is_json(&self) -> bool {
        self.content_type_matches(|ct| ct.starts_with("application/json"))
    }

    pub fn is_binary(&self) -> bool {
        self.content_type_matches(|ct| ct.starts_with("application/octet-stream"))
    }

    fn content_type_matches(&self, pred: impl Fn(&str) -> bool) -> bool {
        self.content_type()
            .map(|ct| pred(ct.trim().to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}
