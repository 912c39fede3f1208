//! Error types shared by the crawl engine and its collaborators.
//!
//! Two families exist. [`FetchError`] describes why a single fetch failed and is
//! recorded on the [`Page`](crate::page::Page) instead of being propagated.
//! [`CrawlError`] covers everything else: configuration mistakes that abort a
//! crawl before any worker starts, and item-level failures returned by
//! extractors, exporters and suppliers, which the workers log and swallow.

use thiserror::Error;

/// Failure of a single fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The transport failed; `status` is set when a response line was received.
    #[error("transport error for {url}: {message}")]
    Transport {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    /// The HTTP status attached to the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Connection-level failures and timeouts; HTTP error statuses are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Transport { status: None, .. }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_timeout() {
            return FetchError::Timeout(url);
        }
        FetchError::Transport {
            url,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// The main error type of the crate.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("crawler cannot be started from state {0}")]
    AlreadyStarted(crate::state::CrawlerStatus),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("extract error: {0}")]
    Extract(String),

    #[error("export error in '{exporter}': {message}")]
    Export { exporter: String, message: String },

    #[error("request supplier error: {0}")]
    Supplier(String),

    #[error("lifecycle hook error in {component}: {message}")]
    Lifecycle { component: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    General(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    pub fn export(exporter: impl Into<String>, message: impl ToString) -> Self {
        CrawlError::Export {
            exporter: exporter.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_exposes_status() {
        let err = FetchError::Transport {
            url: "https://example.com".into(),
            status: Some(503),
            message: "service unavailable".into(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(FetchError::Timeout("x".into()).status(), None);
    }

    #[test]
    fn anyhow_errors_convert_at_the_boundary() {
        fn user_code() -> Result<(), CrawlError> {
            let parsed: anyhow::Result<()> = Err(anyhow::anyhow!("selector blew up"));
            parsed?;
            Ok(())
        }
        let err = user_code().unwrap_err();
        assert!(matches!(err, CrawlError::Other(_)));
        assert_eq!(err.to_string(), "selector blew up");
    }
}
