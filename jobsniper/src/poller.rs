//! The poll loop: fetch every feed, drop what the seen-set already has, optionally draft a
//! proposal, notify, then mark.
//!
//! Delivery happens before marking. A crash between the two means one duplicate alert on the
//! next start, never a lost one.
//!
//! The loop starts in `Init`. When the seen-set is empty every feed is seeded silently on its
//! first successful fetch (first-run spam-guard). A feed whose seeding fetch fails stays
//! pending and is seeded on a later tick. Once nothing is pending the loop is `Steady`.

use chrono::Utc;
use common::{Config, DraftFallback};
use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, error, info, warn};

use crate::error::{DeliveryError, DraftError, PollError, StoreError};
use crate::filter::{self, KeywordSet};
use crate::ingestion::FeedSource;
use crate::llm::drafter::{failure_note, ProposalDrafter};
use crate::model::Posting;
use crate::notify::message::{format_alert, DraftSection, OFFLINE_MESSAGE, ONLINE_MESSAGE};
use crate::notify::Notifier;
use crate::storage::SeenStore;

const MAX_STORE_BACKOFF: Duration = Duration::from_secs(30);

/// Everything the loop needs to know, resolved from [`Config`] once at startup.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub feed_urls: Vec<String>,
    pub interval: Duration,
    pub call_timeout: Duration,
    pub keywords: KeywordSet,
    pub first_run_alert_limit: usize,
    pub draft_fallback: DraftFallback,
    pub announce_lifecycle: bool,
    pub store_retry_attempts: u32,
    pub store_retry_backoff: Duration,
}

impl PollerSettings {
    pub fn new(feed_urls: Vec<String>) -> Self {
        Self {
            feed_urls,
            interval: Duration::from_secs(600),
            call_timeout: Duration::from_secs(30),
            keywords: KeywordSet::default(),
            first_run_alert_limit: 0,
            draft_fallback: DraftFallback::Note,
            announce_lifecycle: false,
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let poller = &config.poller;
        Self {
            feed_urls: config.feeds.urls.clone(),
            interval: poller.interval(),
            call_timeout: poller.call_timeout(),
            keywords: KeywordSet::new(&config.filter.keywords),
            first_run_alert_limit: poller.first_run_alert_limit.unwrap_or(0),
            draft_fallback: config.drafter.fallback.unwrap_or_default(),
            announce_lifecycle: poller.announce_lifecycle.unwrap_or(true),
            store_retry_attempts: poller.store_retry_attempts.unwrap_or(3).max(1),
            store_retry_backoff: Duration::from_millis(poller.store_retry_backoff_ms.unwrap_or(500)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Init,
    Steady,
}

/// Counters for one tick (or for the initial seeding pass).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub feeds_seeded: usize,
    pub fetched: usize,
    pub seeded: usize,
    /// Postings not in the seen-set, filtered or not
    pub new: usize,
    pub filtered_out: usize,
    pub notified: usize,
    pub delivery_failures: usize,
    pub draft_failures: usize,
}

impl TickReport {
    fn merge(&mut self, other: &TickReport) {
        self.feeds_ok += other.feeds_ok;
        self.feeds_failed += other.feeds_failed;
        self.feeds_seeded += other.feeds_seeded;
        self.fetched += other.fetched;
        self.seeded += other.seeded;
        self.new += other.new;
        self.filtered_out += other.filtered_out;
        self.notified += other.notified;
        self.delivery_failures += other.delivery_failures;
        self.draft_failures += other.draft_failures;
    }
}

pub struct Poller {
    settings: PollerSettings,
    source: Arc<dyn FeedSource>,
    store: Arc<dyn SeenStore>,
    notifier: Arc<dyn Notifier>,
    drafter: Option<Arc<dyn ProposalDrafter>>,
    initialized: OnceCell<()>,
    pending_seed: Mutex<HashSet<String>>,
    first_run_budget: AtomicUsize,
    in_flight: Mutex<HashSet<String>>,
    cycle: AtomicU64,
}

impl Poller {
    pub fn new(
        settings: PollerSettings,
        source: Arc<dyn FeedSource>,
        store: Arc<dyn SeenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            source,
            store,
            notifier,
            drafter: None,
            initialized: OnceCell::new(),
            pending_seed: Mutex::new(HashSet::new()),
            first_run_budget: AtomicUsize::new(0),
            in_flight: Mutex::new(HashSet::new()),
            cycle: AtomicU64::new(0),
        }
    }

    pub fn with_drafter(mut self, drafter: Arc<dyn ProposalDrafter>) -> Self {
        self.drafter = Some(drafter);
        self
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    pub fn state(&self) -> PollState {
        if self.initialized.initialized() && lock(&self.pending_seed).is_empty() {
            PollState::Steady
        } else {
            PollState::Init
        }
    }

    /// Run until `shutdown` is notified. The tick in progress is finished first.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), PollError> {
        if self.settings.announce_lifecycle {
            self.announce(ONLINE_MESSAGE).await;
        }
        info!(
            feeds = self.settings.feed_urls.len(),
            "Checking every {} minutes",
            self.settings.interval.as_secs() / 60
        );

        let result = self.run_loop(&shutdown).await;

        if self.settings.announce_lifecycle {
            self.announce(OFFLINE_MESSAGE).await;
        }
        match &result {
            Ok(()) => info!("poller: shutdown complete"),
            Err(e) => error!(error = %e, "poller: stopped on fatal error"),
        }
        result
    }

    async fn run_loop(&self, shutdown: &Notify) -> Result<(), PollError> {
        let seeding = self.init().await?;
        // Restarting with an existing seen-set: check right away instead of waiting a full interval
        let mut tick_now = seeding.feeds_seeded == 0 && seeding.feeds_failed == 0;

        loop {
            if !tick_now {
                info!("Sleeping {:?} until next tick", self.settings.interval);
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.interval) => {}
                    _ = shutdown.notified() => {
                        info!("poller: shutdown requested, exiting loop");
                        return Ok(());
                    }
                }
            }
            tick_now = false;
            self.tick().await?;
        }
    }

    /// INIT: on an empty seen-set, fetch every feed once and mark all postings without
    /// notifying. Feeds that fail stay pending for the next tick.
    pub async fn init(&self) -> Result<TickReport, PollError> {
        self.ensure_initialized().await?;

        let pending: Vec<String> = {
            let pending_seed = lock(&self.pending_seed);
            self.settings
                .feed_urls
                .iter()
                .filter(|url| pending_seed.contains(*url))
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            return Ok(TickReport::default());
        }

        let report = self.process_feeds(&pending).await?;
        info!(
            seeded = report.seeded,
            feeds_seeded = report.feeds_seeded,
            feeds_failed = report.feeds_failed,
            state = ?self.state(),
            "First run seeding finished"
        );
        Ok(report)
    }

    /// One poll-filter-notify cycle over every configured feed.
    pub async fn tick(&self) -> Result<TickReport, PollError> {
        self.ensure_initialized().await?;

        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        info!(cycle, at = %Utc::now().format("%H:%M:%S"), "CYCLE #{} started", cycle);

        let feeds = self.settings.feed_urls.clone();
        let report = self.process_feeds(&feeds).await?;

        match self.store.count().await {
            Ok(total) => info!(
                cycle,
                fetched = report.fetched,
                new = report.new,
                filtered_out = report.filtered_out,
                notified = report.notified,
                delivery_failures = report.delivery_failures,
                draft_failures = report.draft_failures,
                feeds_failed = report.feeds_failed,
                "Tick finished, {} postings tracked",
                total
            ),
            Err(e) => warn!(cycle, error = %e, "Tick finished, could not count tracked postings"),
        }
        Ok(report)
    }

    async fn ensure_initialized(&self) -> Result<(), PollError> {
        self.initialized
            .get_or_try_init(|| async {
                let store = self.store.as_ref();
                let empty = self.with_store_retry("is_empty", move || store.is_empty()).await?;
                if empty {
                    info!(
                        feeds = self.settings.feed_urls.len(),
                        alert_limit = self.settings.first_run_alert_limit,
                        "First run: seen-set is empty, seeding feeds without notifications"
                    );
                    lock(&self.pending_seed).extend(self.settings.feed_urls.iter().cloned());
                    self.first_run_budget
                        .store(self.settings.first_run_alert_limit, Ordering::SeqCst);
                }
                Ok::<(), PollError>(())
            })
            .await
            .map(|_| ())
    }

    /// Feeds are independent, so they run concurrently. Every feed finishes before an error
    /// is reported.
    ///
    /// While first-run alerts are left and a feed still needs seeding, feeds go one at a time
    /// in configured order so the alerts go to the first feeds listed.
    async fn process_feeds(&self, feed_urls: &[String]) -> Result<TickReport, PollError> {
        let results = if self.first_run_alerts_contested(feed_urls) {
            let mut results = Vec::with_capacity(feed_urls.len());
            for url in feed_urls {
                results.push(self.process_feed(url).await);
            }
            results
        } else {
            join_all(feed_urls.iter().map(|url| self.process_feed(url))).await
        };

        let mut report = TickReport::default();
        let mut fatal = None;
        for result in results {
            match result {
                Ok(feed_report) => report.merge(&feed_report),
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn process_feed(&self, feed_url: &str) -> Result<TickReport, PollError> {
        let mut report = TickReport::default();
        let seeding = lock(&self.pending_seed).contains(feed_url);

        info!(feed_url, seeding, "Checking {}...", crate::model::source_label(feed_url));
        let postings = match tokio::time::timeout(self.settings.call_timeout, self.source.fetch(feed_url)).await {
            Ok(Ok(postings)) => postings,
            Ok(Err(e)) => {
                warn!(feed_url, error = %e, at = %Utc::now(), "Feed fetch failed, retrying next tick");
                report.feeds_failed = 1;
                return Ok(report);
            }
            Err(_) => {
                warn!(
                    feed_url,
                    timeout = ?self.settings.call_timeout,
                    at = %Utc::now(),
                    "Feed fetch timed out, retrying next tick"
                );
                report.feeds_failed = 1;
                return Ok(report);
            }
        };
        report.feeds_ok = 1;
        report.fetched = postings.len();

        let postings = unique_by_id(postings);

        if seeding {
            self.seed_feed(feed_url, postings, &mut report).await?;
            lock(&self.pending_seed).remove(feed_url);
            report.feeds_seeded = 1;
        } else {
            for posting in &postings {
                self.process_posting(posting, &mut report).await?;
            }
        }

        info!(
            feed_url,
            fetched = report.fetched,
            new = report.new,
            seeded = report.seeded,
            notified = report.notified,
            "Found {} total, {} new",
            report.fetched,
            report.new + report.seeded
        );
        Ok(report)
    }

    /// Mark everything as seen without notifying, except for up to `first_run_alert_limit`
    /// postings which take the normal path.
    async fn seed_feed(&self, feed_url: &str, postings: Vec<Posting>, report: &mut TickReport) -> Result<(), PollError> {
        for posting in &postings {
            if self.take_first_run_alert() {
                debug!(feed_url, posting_id = %posting.id, "First run alert");
                self.process_posting(posting, report).await?;
                continue;
            }

            let store = self.store.as_ref();
            let id = posting.id.as_str();
            let seen_at = Utc::now();
            let inserted = self
                .with_store_retry("mark", move || store.mark(id, seen_at))
                .await?;
            if inserted {
                report.seeded += 1;
            }
        }
        Ok(())
    }

    fn first_run_alerts_contested(&self, feed_urls: &[String]) -> bool {
        if self.first_run_budget.load(Ordering::SeqCst) == 0 {
            return false;
        }
        let pending = lock(&self.pending_seed);
        feed_urls.iter().any(|url| pending.contains(url))
    }

    fn take_first_run_alert(&self) -> bool {
        self.first_run_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    async fn process_posting(&self, posting: &Posting, report: &mut TickReport) -> Result<(), PollError> {
        // Another feed in this tick may be handling the same id right now
        let Some(_claim) = Claim::acquire(&self.in_flight, &posting.id) else {
            debug!(posting_id = %posting.id, feed_url = %posting.feed_url, "Posting already in flight, skipping");
            return Ok(());
        };

        let store = self.store.as_ref();
        let is_new = self
            .with_store_retry("contains", move || filter::is_new(store, posting))
            .await?;
        if !is_new {
            return Ok(());
        }
        report.new += 1;

        if !filter::passes_keywords(posting, &self.settings.keywords) {
            debug!(posting_id = %posting.id, "Posting filtered out by keywords");
            report.filtered_out += 1;
            return Ok(());
        }

        let draft = self.draft_for(posting, report).await;
        let message = format_alert(posting, draft.as_ref());

        let delivery = match tokio::time::timeout(self.settings.call_timeout, self.notifier.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.settings.call_timeout)),
        };
        if let Err(e) = delivery {
            warn!(
                posting_id = %posting.id,
                feed_url = %posting.feed_url,
                error = %e,
                at = %Utc::now(),
                "Delivery failed, posting stays unseen and will be retried next tick"
            );
            report.delivery_failures += 1;
            return Ok(());
        }
        report.notified += 1;

        let id = posting.id.as_str();
        let seen_at = Utc::now();
        self.with_store_retry("mark", move || store.mark(id, seen_at)).await?;
        info!(posting_id = %posting.id, "Alerted: {}", posting.title.chars().take(40).collect::<String>());
        Ok(())
    }

    async fn draft_for(&self, posting: &Posting, report: &mut TickReport) -> Option<DraftSection> {
        let drafter = self.drafter.as_ref()?;

        let outcome = match tokio::time::timeout(
            self.settings.call_timeout,
            drafter.draft(&posting.title, &posting.description),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DraftError::Timeout(self.settings.call_timeout)),
        };

        match outcome {
            Ok(text) => Some(DraftSection::Proposal(text)),
            Err(e) => {
                report.draft_failures += 1;
                warn!(
                    posting_id = %posting.id,
                    feed_url = %posting.feed_url,
                    error = %e,
                    fallback = ?self.settings.draft_fallback,
                    "Proposal drafting failed, notifying without a draft"
                );
                match self.settings.draft_fallback {
                    DraftFallback::Note => Some(DraftSection::Unavailable(failure_note(&e))),
                    DraftFallback::Omit => None,
                }
            }
        }
    }

    async fn announce(&self, message: &str) {
        match tokio::time::timeout(self.settings.call_timeout, self.notifier.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Lifecycle message could not be delivered"),
            Err(_) => warn!(timeout = ?self.settings.call_timeout, "Lifecycle message timed out"),
        }
    }

    /// Retry a store operation with exponential backoff, then give up with a fatal error.
    async fn with_store_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.settings.store_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    let backoff = self
                        .settings
                        .store_retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1))
                        .min(MAX_STORE_BACKOFF);
                    warn!(op, attempt, error = %e, "Store operation failed, retrying in {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(op, attempts = attempt, error = %e, "Store operation failed repeatedly");
                    return Err(PollError::Store {
                        op,
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// First occurrence of an id wins.
fn unique_by_id(postings: Vec<Posting>) -> Vec<Posting> {
    let mut seen = HashSet::new();
    postings
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

/// Exclusive hold on a posting id for the duration of check-notify-mark.
struct Claim<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> Claim<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        if lock(set).insert(id.to_string()) {
            Some(Self {
                set,
                id: id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}
