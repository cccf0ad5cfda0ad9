/*!
common/src/lib.rs

Shared configuration types and DB helper functions for jobsniper.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that layers an override file on top of a default file
- Helpers to initialize and migrate the SQLite database holding the seen-set
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const MAX_STORE_RETRY_ATTEMPTS: u32 = 10;
pub const MAX_TELEGRAM_RETRIES: u8 = 10;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/jobsniper.db")
    pub path: String,
}

/// Feeds to watch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Poll loop tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Seconds between two ticks (default 600)
    pub interval_seconds: Option<u64>,
    /// Upper bound for a single fetch / draft / send call (default 30)
    pub call_timeout_seconds: Option<u64>,
    /// How many postings to alert on the very first run (default 0: seed silently)
    pub first_run_alert_limit: Option<usize>,
    /// Send "online" / "offline" messages when the loop starts and stops
    pub announce_lifecycle: Option<bool>,
    pub store_retry_attempts: Option<u32>,
    pub store_retry_backoff_ms: Option<u64>,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.unwrap_or(600))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds.unwrap_or(30))
    }
}

/// Keyword filter. An empty list lets every posting through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Telegram bot credentials and transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Inline token. Prefer `bot_token_env` so the token stays out of config files.
    pub bot_token: Option<String>,
    /// Name of the env var holding the token (default "TELEGRAM_BOT_TOKEN")
    pub bot_token_env: Option<String>,
    pub chat_id: String,
    /// Bot API base URL (default "https://api.telegram.org")
    pub api_base: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u8>,
}

impl TelegramConfig {
    /// Resolve the bot token: inline value first, then the configured env var.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.bot_token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(token.trim().to_string());
        }
        let env_name = self.bot_token_env.as_deref().unwrap_or("TELEGRAM_BOT_TOKEN");
        let token = std::env::var(env_name)
            .with_context(|| format!("Telegram bot token env var '{}' not set", env_name))?;
        if token.trim().is_empty() {
            bail!("Telegram bot token env var '{}' is empty", env_name);
        }
        Ok(token.trim().to_string())
    }
}

/// What goes into the alert when proposal drafting fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftFallback {
    /// Include a short "draft it manually" note in place of the proposal
    #[default]
    Note,
    /// Send the raw posting without any proposal section
    Omit,
}

/// Proposal drafter (OpenAI-compatible chat completion endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrafterConfig {
    /// `enable_drafting`; defaults to false
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
    /// Env var holding the API key (default "GEMINI_API_KEY")
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Skills the drafter is told to highlight
    pub skills: Option<Vec<String>>,
    pub fallback: Option<DraftFallback>,
}

impl DrafterConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        let env_name = self.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY");
        let key = std::env::var(env_name)
            .with_context(|| format!("Drafter API key env var '{}' not set", env_name))?;
        if key.trim().is_empty() {
            bail!("Drafter API key env var '{}' is empty", env_name);
        }
        Ok(key)
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub drafter: DrafterConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Reject configurations the poll loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.urls.is_empty() {
            bail!("no feeds configured ([feeds] urls is empty)");
        }
        for raw in &self.feeds.urls {
            validate_feed_url(raw)?;
        }
        if self.poller.interval_seconds == Some(0) {
            bail!("poller.interval_seconds must be greater than zero");
        }
        if let Some(attempts) = self.poller.store_retry_attempts {
            if !(1..=MAX_STORE_RETRY_ATTEMPTS).contains(&attempts) {
                bail!(
                    "poller.store_retry_attempts must be between 1 and {} (got {})",
                    MAX_STORE_RETRY_ATTEMPTS,
                    attempts
                );
            }
        }
        if let Some(retries) = self.telegram.max_retries {
            if retries > MAX_TELEGRAM_RETRIES {
                bail!(
                    "telegram.max_retries must be at most {} (got {})",
                    MAX_TELEGRAM_RETRIES,
                    retries
                );
            }
        }
        if self.telegram.chat_id.trim().is_empty() {
            bail!("telegram.chat_id is empty");
        }
        Ok(())
    }
}

/// A feed URL must be absolute http(s) with a host.
pub fn validate_feed_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw).with_context(|| format!("invalid feed URL: {}", raw))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        bail!("feed URL must be http(s) with a host: {}", raw);
    }
    Ok(parsed)
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Run the embedded SQL migrations (`migrations/` at the workspace root) against the pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("Failed to run sqlx migrations")?;

    Ok(())
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and the DB file if missing, so that permission
/// or path problems surface here with a clear message. Migrations are run separately with
/// [`run_migrations`].
///
/// Example:
///   let pool = init_db_pool("data/jobsniper.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    // A handful of connections is plenty for one poller.
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
