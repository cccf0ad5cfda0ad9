use std::time::Duration;
use thiserror::Error;

/// Feed retrieval failed. Transient: the feed is retried on the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid feed url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("feed {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("feed {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("feed {url} could not be parsed: {reason}")]
    Parse { url: String, reason: String },

    #[error("feed {url} request failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Proposal drafting failed. Never fatal: the alert goes out without a draft.
#[derive(Debug, Error)]
pub enum DraftError {
    #[error("drafter timed out after {0:?}")]
    Timeout(Duration),

    #[error("drafter returned an empty proposal")]
    Empty,

    #[error("drafter quota or rate limit exhausted: {0}")]
    Quota(String),

    #[error("drafter request failed: {0:#}")]
    Api(#[from] anyhow::Error),
}

/// Non-success HTTP status from the LLM endpoint.
#[derive(Debug, Error)]
#[error("LLM API error {status}: {body}")]
pub struct LlmApiError {
    pub status: u16,
    pub body: String,
}

impl LlmApiError {
    pub fn is_quota(&self) -> bool {
        self.status == 429
    }
}

/// Message delivery failed. The posting stays unseen and is retried next tick.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("refusing to send an empty message")]
    EmptyMessage,

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("chat API rejected the message: {0}")]
    Rejected(String),

    /// 5xx or 429: the API is up to something, not our credentials
    #[error("chat API temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("delivery request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// Seen-set store failure. Fatal when opening; retried then escalated otherwise.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("seen-set store unavailable: {0:#}")]
    Unavailable(anyhow::Error),

    #[error("seen-set query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Failures that stop the poll loop.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("store operation '{op}' failed after {attempts} attempts: {source}")]
    Store {
        op: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}
