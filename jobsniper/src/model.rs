use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One job listing pulled from a feed. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    /// Feed this posting was read from
    pub feed_url: String,
}

impl Posting {
    /// Short human label for the feed, e.g. "https://www.upwork.com/ab/feed" -> "Upwork".
    pub fn source_label(&self) -> String {
        source_label(&self.feed_url)
    }
}

pub fn source_label(feed_url: &str) -> String {
    let host = url::Url::parse(feed_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| feed_url.to_string());
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let first = host.split('.').next().unwrap_or(host);

    let mut chars = first.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::from("Feed"),
    }
}
