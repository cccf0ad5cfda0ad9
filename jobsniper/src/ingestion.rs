use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::model::Posting;

/// Some job boards refuse obvious bot agents, so we look like a browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const NO_DESCRIPTION: &str = "No description available";

/// Anything that can turn a feed URL into postings.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, feed_url: &str) -> Result<Vec<Posting>, FetchError>;
}

/// RSS/Atom over HTTP, parsed with feed-rs.
pub struct HttpFeedSource {
    client: Client,
    timeout: Duration,
    max_attempts: u32,
    base_backoff: Duration,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/rss+xml, application/atom+xml, application/xml, text/xml, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build reqwest client: {}", e))?;

        Ok(Self {
            client,
            timeout,
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        })
    }

    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    async fn fetch_body(&self, feed_url: &str) -> Result<Vec<u8>, FetchError> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let backoff = self.base_backoff.saturating_mul(2u32.saturating_pow(attempt - 2)); // 1x, 2x, 4x...
                info!(
                    feed_url,
                    "Retrying feed fetch (attempt {}/{}) after {:?}",
                    attempt,
                    self.max_attempts,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(feed_url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| self.network_error(feed_url, e))?;
                        return Ok(bytes.to_vec());
                    }
                    let err = FetchError::Status {
                        url: feed_url.to_string(),
                        status: status.as_u16(),
                    };
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(err);
                        continue;
                    }
                    // Other 4xx are not going to fix themselves within this tick
                    return Err(err);
                }
                Err(e) => {
                    last_error = Some(self.network_error(feed_url, e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Timeout {
            url: feed_url.to_string(),
            after: self.timeout,
        }))
    }

    fn network_error(&self, feed_url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: feed_url.to_string(),
                after: self.timeout,
            }
        } else {
            FetchError::Network {
                url: feed_url.to_string(),
                source: e,
            }
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed_url: &str) -> Result<Vec<Posting>, FetchError> {
        common::validate_feed_url(feed_url).map_err(|e| FetchError::InvalidUrl {
            url: feed_url.to_string(),
            reason: e.to_string(),
        })?;

        let body = self.fetch_body(feed_url).await?;
        let postings = parse_postings(&body, feed_url, Utc::now())?;
        info!(feed_url, count = postings.len(), "Fetched feed");
        Ok(postings)
    }
}

/// Parse an RSS/Atom document into postings.
pub fn parse_postings(body: &[u8], feed_url: &str, fetched_at: DateTime<Utc>) -> Result<Vec<Posting>, FetchError> {
    let feed = parser::parse(body).map_err(|e| FetchError::Parse {
        url: feed_url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(postings_from_feed(&feed, feed_url, fetched_at))
}

pub fn postings_from_feed(feed: &Feed, feed_url: &str, fetched_at: DateTime<Utc>) -> Vec<Posting> {
    if feed.entries.is_empty() {
        warn!(feed_url, "No entries found in the feed");
    }
    feed.entries
        .iter()
        .filter_map(|entry| posting_from_entry(entry, feed_url, fetched_at))
        .collect()
}

fn posting_from_entry(entry: &Entry, feed_url: &str, fetched_at: DateTime<Utc>) -> Option<Posting> {
    let title = entry
        .title
        .as_ref()
        .map(|t| collapse_whitespace(&t.content))
        .unwrap_or_default();
    let url = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    if title.is_empty() || url.is_empty() {
        warn!(feed_url, entry_id = %entry.id, "Entry missing title or link, skipping");
        return None;
    }

    let raw_description = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();
    let mut description = html_to_text(&raw_description);
    if description.is_empty() {
        description = NO_DESCRIPTION.to_string();
    }

    let published_at = entry.published.or(entry.updated).unwrap_or(fetched_at);

    debug!(feed_url, posting_id = %url, "Extracted posting: {}", title);
    Some(Posting {
        id: url.clone(),
        title,
        url,
        description,
        published_at,
        feed_url: feed_url.to_string(),
    })
}

/// Strip markup from a feed description and collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return collapse_whitespace(html);
    }
    match html2text::from_read(html.as_bytes(), 10_000) {
        Ok(text) => collapse_whitespace(&text),
        Err(e) => {
            warn!("failed to convert description HTML to text: {}", e);
            collapse_whitespace(html)
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
