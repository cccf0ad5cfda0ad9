// Scripted stand-ins for the external collaborators of the poll loop.
#![allow(dead_code)]

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobsniper::error::{DeliveryError, DraftError, FetchError, StoreError};
use jobsniper::ingestion::FeedSource;
use jobsniper::llm::drafter::ProposalDrafter;
use jobsniper::model::Posting;
use jobsniper::notify::Notifier;
use jobsniper::poller::{Poller, PollerSettings};
use jobsniper::storage::{MemorySeenStore, SeenStore};

pub const FEED_A: &str = "https://jobs-a.example.com/rss";
pub const FEED_B: &str = "https://jobs-b.example.com/rss";

pub fn posting(feed_url: &str, n: u32, title: &str, description: &str) -> Posting {
    Posting {
        id: format!("https://jobs.example.com/job/{}", n),
        title: title.to_string(),
        url: format!("https://jobs.example.com/job/{}", n),
        description: description.to_string(),
        published_at: Utc::now(),
        feed_url: feed_url.to_string(),
    }
}

pub fn settings(feeds: &[&str]) -> PollerSettings {
    let mut settings = PollerSettings::new(feeds.iter().map(|f| f.to_string()).collect());
    settings.interval = Duration::from_millis(20);
    settings.call_timeout = Duration::from_secs(2);
    settings.store_retry_backoff = Duration::from_millis(1);
    settings
}

/// Feed contents can be swapped between ticks; a feed can be made to fail.
#[derive(Default)]
pub struct ScriptedSource {
    feeds: Mutex<HashMap<String, Vec<Posting>>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    slow_feeds: Mutex<HashMap<String, Duration>>,
    pub fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_feed(&self, feed_url: &str, postings: Vec<Posting>) {
        self.feeds.lock().unwrap().insert(feed_url.to_string(), postings);
    }

    pub fn push(&self, feed_url: &str, posting: Posting) {
        self.feeds
            .lock()
            .unwrap()
            .entry(feed_url.to_string())
            .or_default()
            .push(posting);
    }

    pub fn set_failing(&self, feed_url: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(feed_url.to_string());
        } else {
            set.remove(feed_url);
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Delay only this feed; `None` makes it fast again.
    pub fn set_feed_delay(&self, feed_url: &str, delay: Option<Duration>) {
        let mut slow = self.slow_feeds.lock().unwrap();
        match delay {
            Some(delay) => slow.insert(feed_url.to_string(), delay),
            None => slow.remove(feed_url),
        };
    }
}

#[async_trait::async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, feed_url: &str) -> Result<Vec<Posting>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let per_feed = self.slow_feeds.lock().unwrap().get(feed_url).copied();
        let delay = per_feed.or(*self.delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(feed_url) {
            return Err(FetchError::Status {
                url: feed_url.to_string(),
                status: 503,
            });
        }
        Ok(self.feeds.lock().unwrap().get(feed_url).cloned().unwrap_or_default())
    }
}

/// Records every delivered message. Can be told to fail the next N sends or to hang.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail_next: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    pub attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Alerts only, lifecycle announcements excluded.
    pub fn alerts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.contains("NEW JOB ALERT"))
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError::Rejected("HTTP 502: scripted failure".to_string()));
        }
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub struct FailingDrafter;

#[async_trait::async_trait]
impl ProposalDrafter for FailingDrafter {
    async fn draft(&self, _title: &str, _description: &str) -> Result<String, DraftError> {
        Err(DraftError::Api(anyhow::anyhow!("quota exhausted")))
    }
}

pub struct EchoDrafter;

#[async_trait::async_trait]
impl ProposalDrafter for EchoDrafter {
    async fn draft(&self, title: &str, _description: &str) -> Result<String, DraftError> {
        Ok(format!("Proposal for {}", title))
    }
}

/// Never answers within any sane call timeout.
pub struct HangingDrafter;

#[async_trait::async_trait]
impl ProposalDrafter for HangingDrafter {
    async fn draft(&self, _title: &str, _description: &str) -> Result<String, DraftError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }
}

/// Memory store whose operations can be made to fail a number of times.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemorySeenStore,
    contains_failures: AtomicUsize,
    mark_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_contains(&self, n: usize) {
        self.contains_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_mark(&self, n: usize) {
        self.mark_failures.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn scripted_error() -> StoreError {
        StoreError::Query(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait::async_trait]
impl SeenStore for FlakyStore {
    async fn contains(&self, posting_id: &str) -> Result<bool, StoreError> {
        if Self::take(&self.contains_failures) {
            return Err(Self::scripted_error());
        }
        self.inner.contains(posting_id).await
    }

    async fn mark(&self, posting_id: &str, seen_at: chrono::DateTime<Utc>) -> Result<bool, StoreError> {
        if Self::take(&self.mark_failures) {
            return Err(Self::scripted_error());
        }
        self.inner.mark(posting_id, seen_at).await
    }

    async fn is_empty(&self) -> Result<bool, StoreError> {
        self.inner.is_empty().await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }
}

pub fn poller(
    settings: PollerSettings,
    source: &Arc<ScriptedSource>,
    store: Arc<dyn SeenStore>,
    notifier: &Arc<RecordingNotifier>,
) -> Poller {
    Poller::new(settings, source.clone(), store, notifier.clone())
}
