use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;

/// Persisted set of posting ids that were already handled.
///
/// `mark` is idempotent: marking an id twice leaves a single record and returns `false`
/// the second time. Records are never updated or removed.
#[async_trait::async_trait]
pub trait SeenStore: Send + Sync {
    async fn contains(&self, posting_id: &str) -> Result<bool, StoreError>;

    /// Returns true when a new record was created.
    async fn mark(&self, posting_id: &str, seen_at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Only used to detect the very first run.
    async fn is_empty(&self) -> Result<bool, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// SQLite-backed seen-set (table `seen_postings`).
#[derive(Clone)]
pub struct SqliteSeenStore {
    pool: SqlitePool,
}

impl SqliteSeenStore {
    /// Wrap a migrated pool. Fails if the schema is missing.
    pub async fn open(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query("SELECT 1 FROM seen_postings LIMIT 1")
            .fetch_optional(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(anyhow::Error::new(e).context("seen_postings table missing")))?;
        Ok(Self { pool })
    }

    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn open_path(path: &str) -> Result<Self, StoreError> {
        let pool = common::init_db_pool(path).await.map_err(StoreError::Unavailable)?;
        common::run_migrations(&pool).await.map_err(StoreError::Unavailable)?;
        Self::open(pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl SeenStore for SqliteSeenStore {
    async fn contains(&self, posting_id: &str) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM seen_postings WHERE posting_id = ?")
            .bind(posting_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn mark(&self, posting_id: &str, seen_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO seen_postings (posting_id, first_seen_at) VALUES (?, ?)")
            .bind(posting_id)
            .bind(seen_at)
            .execute(&self.pool)
            .await?;
        let inserted = result.rows_affected() > 0;
        debug!(posting_id, inserted, "Marked posting as seen");
        Ok(inserted)
    }

    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.count().await? == 0)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_postings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

/// In-process seen-set, used for `--dry-run` and tests.
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_seen_at(&self, posting_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(posting_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A poisoned map is still a valid map
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl SeenStore for MemorySeenStore {
    async fn contains(&self, posting_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(posting_id))
    }

    async fn mark(&self, posting_id: &str, seen_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut seen = self.lock();
        if seen.contains_key(posting_id) {
            return Ok(false);
        }
        seen.insert(posting_id.to_string(), seen_at);
        Ok(true)
    }

    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock().is_empty())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().len() as u64)
    }
}
