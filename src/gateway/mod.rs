//! Pass-through client for the upstream review-prediction service.
//!
//! Review pages are relayed as opaque JSON. Only the query is shaped here.

mod sample;

use serde_json::Value;
use url::Url;

use crate::config::UpstreamSettings;
use crate::http_client;

pub use sample::{SAMPLE_NOTICE, sample_page};

/// Filters forwarded to the upstream review listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReviewQuery {
    pub page: Option<u32>,
    pub label: Option<String>,
}

/// Failure to obtain a usable review page from upstream.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream returned HTTP {code}")]
    Status { code: u16, body: String },
    #[error("Failed to reach upstream: {0}")]
    Transport(String),
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
    #[error("Invalid reviews URL: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    /// HTTP status reported by upstream, if it answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A review page and where it came from.
#[derive(Debug)]
pub enum ReviewFeed {
    /// Relayed verbatim from upstream.
    Live(Value),
    /// Built-in placeholder data served because upstream failed.
    Sample { body: Value, cause: UpstreamError },
}

impl ReviewFeed {
    /// `"live"` or `"sample"`.
    pub fn data_source(&self) -> &'static str {
        match self {
            Self::Live(_) => "live",
            Self::Sample { .. } => "sample",
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            Self::Live(body) | Self::Sample { body, .. } => body,
        }
    }
}

/// Client for the configured reviews endpoint.
#[derive(Clone)]
pub struct ReviewGateway {
    agent: ureq::Agent,
    reviews_url: Url,
    page_size: u32,
    max_response_bytes: usize,
    demo_fallback: bool,
}

impl ReviewGateway {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, UpstreamError> {
        let reviews_url = Url::parse(&settings.reviews_url).map_err(|err| {
            UpstreamError::InvalidUrl(format!("{}: {err}", settings.reviews_url))
        })?;
        Ok(Self {
            agent: http_client::agent(settings.timeout()),
            reviews_url,
            page_size: settings.default_page_size,
            max_response_bytes: settings.max_response_bytes,
            demo_fallback: settings.demo_fallback,
        })
    }

    pub fn demo_fallback(&self) -> bool {
        self.demo_fallback
    }

    /// Upstream URL for `query`; `page_size` is only sent along with `page`.
    pub(crate) fn request_url(&self, query: &ReviewQuery) -> Url {
        let mut overrides: Vec<(&str, String)> = Vec::new();
        if let Some(page) = query.page {
            overrides.push(("page", page.to_string()));
            overrides.push(("page_size", self.page_size.to_string()));
        }
        if let Some(label) = query.label.as_deref().filter(|label| !label.is_empty()) {
            overrides.push(("label", label.to_string()));
        }
        let mut url = self.reviews_url.clone();
        if overrides.is_empty() {
            return url;
        }
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !overrides.iter().any(|(name, _)| *name == &**key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .extend_pairs(overrides);
        url
    }

    /// Fetch one review page and relay its JSON body unchanged.
    pub fn fetch_reviews(&self, query: &ReviewQuery) -> Result<Value, UpstreamError> {
        let url = self.request_url(query);
        tracing::debug!("Fetching reviews from {url}");
        let response = match self
            .agent
            .get(url.as_str())
            .set("Accept", "application/json")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = http_client::read_response_bytes(response, self.max_response_bytes)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_else(|err| err.to_string());
                return Err(UpstreamError::Status { code, body });
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(UpstreamError::Transport(err.to_string()));
            }
        };
        let bytes = http_client::read_response_bytes(response, self.max_response_bytes)
            .map_err(|err| UpstreamError::InvalidResponse(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| UpstreamError::InvalidResponse(err.to_string()))
    }

    /// Like [`Self::fetch_reviews`], but with demo fallback enabled an upstream
    /// failure becomes a flagged sample page.
    pub fn fetch_feed(&self, query: &ReviewQuery) -> Result<ReviewFeed, UpstreamError> {
        match self.fetch_reviews(query) {
            Ok(body) => Ok(ReviewFeed::Live(body)),
            Err(cause) if self.demo_fallback => {
                tracing::warn!("Upstream unavailable, serving sample reviews: {cause}");
                Ok(ReviewFeed::Sample {
                    body: sample_page(query),
                    cause,
                })
            }
            Err(err) => Err(err),
        }
    }
}
