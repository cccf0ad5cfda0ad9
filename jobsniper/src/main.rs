/*
jobsniper - main.rs
Loads the configuration, wires the feed source, seen-set, drafter and Telegram notifier
together and runs the poll loop until the process is asked to stop.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use jobsniper::error::DeliveryError;
use jobsniper::ingestion::HttpFeedSource;
use jobsniper::llm::drafter::{LlmDrafter, ProposalDrafter};
use jobsniper::llm::remote::{RemoteLlmProvider, DEFAULT_API_URL, DEFAULT_MODEL};
use jobsniper::notify::telegram::{TelegramNotifier, DEFAULT_API_BASE};
use jobsniper::notify::{LogNotifier, Notifier};
use jobsniper::poller::{Poller, PollerSettings};
use jobsniper::storage::{MemorySeenStore, SeenStore, SqliteSeenStore};

#[derive(Parser, Debug)]
#[command(name = "jobsniper", about = "Watch freelance job feeds and get Telegram alerts for new postings")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run the first-run check and a single tick, then exit
    #[arg(long)]
    once: bool,

    /// Log alerts instead of sending them and keep the seen-set in memory
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Secrets usually live in .env next to the config
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config.clone()).await?;
    config.validate().context("invalid configuration")?;

    let settings = PollerSettings::from_config(&config);
    info!(
        feeds = settings.feed_urls.len(),
        interval = ?settings.interval,
        keywords = settings.keywords.len(),
        drafting = config.drafter.is_enabled(),
        "configuration loaded"
    );

    let store: Arc<dyn SeenStore> = if args.dry_run {
        info!("dry run: seen-set kept in memory");
        Arc::new(MemorySeenStore::new())
    } else {
        let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
            Ok(p) => p.to_string_lossy().to_string(),
            Err(_) => config.database.path.clone(),
        };
        info!(db_path = %db_path_abs, "opening seen-set store");
        let store = SqliteSeenStore::open_path(&db_path_abs).await.map_err(|e| {
            error!(%e, db_path = %db_path_abs, "failed to open seen-set store");
            e
        })?;
        Arc::new(store)
    };

    let notifier = build_notifier(&config, args.dry_run).await?;
    let source = Arc::new(HttpFeedSource::new(settings.call_timeout)?);

    let mut poller = Poller::new(settings, source, store, notifier);
    if config.drafter.is_enabled() {
        poller = poller.with_drafter(build_drafter(&config)?);
    }

    if args.once {
        let seeded = poller.init().await?;
        let report = poller.tick().await?;
        info!(?seeded, ?report, "single run finished");
        return Ok(());
    }

    let shutdown = Arc::new(Notify::new());
    let run = poller.run(shutdown.clone());
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => res?,
        _ = shutdown_signal() => {
            info!("shutdown signal received, finishing current tick");
            shutdown.notify_one();
            run.await?;
        }
    }

    info!("Goodbye!");
    Ok(())
}

async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    .map_err(|e| {
        error!(%e, "failed to load configuration");
        e
    })?;
    info!(default = ?default_path, override = ?override_path, "configuration files read");
    Ok(config)
}

async fn build_notifier(config: &Config, dry_run: bool) -> Result<Arc<dyn Notifier>> {
    if dry_run {
        return Ok(Arc::new(LogNotifier));
    }

    let telegram = &config.telegram;
    let token = telegram.resolve_token()?;
    let notifier = TelegramNotifier::new(token, telegram.chat_id.clone())
        .with_api_base(telegram.api_base.clone().unwrap_or_else(|| DEFAULT_API_BASE.to_string()))
        .with_timeout(Duration::from_secs(telegram.timeout_seconds.unwrap_or(30)))
        .with_retries(telegram.max_retries.unwrap_or(1));

    match notifier.verify().await {
        Ok(()) => info!("Telegram credentials verified"),
        Err(DeliveryError::Rejected(reason)) => {
            error!(%reason, "Telegram rejected the bot token");
            anyhow::bail!("bad Telegram credentials: {}", reason);
        }
        // Outages and network trouble at boot are not credential problems; deliveries retry per tick
        Err(e) => warn!(error = %e, "could not verify Telegram credentials, continuing"),
    }

    Ok(Arc::new(notifier))
}

fn build_drafter(config: &Config) -> Result<Arc<dyn ProposalDrafter>> {
    let drafter = &config.drafter;
    let api_key = drafter.resolve_api_key()?;

    let model = drafter.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let api_url = drafter.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let provider = RemoteLlmProvider::new(api_url, api_key, model).with_defaults(
        drafter.timeout_seconds.unwrap_or(30),
        drafter.max_tokens.unwrap_or(400),
        drafter.temperature.unwrap_or(0.7),
    );
    info!(model = provider.model(), "Proposal drafter initialized");

    let llm_drafter = LlmDrafter::new(Arc::new(provider))
        .with_skills(drafter.skills.clone().unwrap_or_default());
    Ok(Arc::new(llm_drafter))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
