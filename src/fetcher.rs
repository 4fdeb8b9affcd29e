use crate::config::Config;
use crate::error::DashboardError;
use crate::types::{ExchangeSnapshot, Feed};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};

/// Read access to an upstream feed. Implemented over HTTP in production;
/// tests substitute counting fakes to assert which feeds get fetched.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the latest snapshot array for one feed.
    ///
    /// Callers must not invoke this for a feed the current wallet lacks
    /// access to - the fetcher itself performs no authorization.
    async fn fetch(&self, feed: Feed) -> Result<Vec<ExchangeSnapshot>, DashboardError>;
}

/// HTTP fetcher against the feed-specific JSON endpoints
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    kom_url: String,
    bba_url: String,
}

impl HttpFeedFetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            kom_url: config.feed_url(Feed::Kom).to_string(),
            bba_url: config.feed_url(Feed::Bba).to_string(),
        }
    }

    fn url(&self, feed: Feed) -> &str {
        match feed {
            Feed::Kom => &self.kom_url,
            Feed::Bba => &self.bba_url,
        }
    }

    fn no_cache_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, feed: Feed) -> Result<Vec<ExchangeSnapshot>, DashboardError> {
        let response = self
            .client
            .get(self.url(feed))
            .headers(Self::no_cache_headers())
            .send()
            .await
            .map_err(|e| DashboardError::fetch(feed, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DashboardError::fetch(feed, format!("HTTP status {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DashboardError::fetch(feed, e.to_string()))?;

        // Distinguish malformed payloads from transport failures so they
        // can be diagnosed separately, even though retry policy is shared.
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| DashboardError::malformed(feed, format!("invalid JSON: {e}")))?;

        if !value.is_array() {
            return Err(DashboardError::malformed(feed, "expected a JSON array"));
        }

        serde_json::from_value(value)
            .map_err(|e| DashboardError::malformed(feed, format!("unexpected element shape: {e}")))
    }
}
