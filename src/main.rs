//! feedwatch: watches RSS feeds and delivers new, filter-matching items as
//! mail or chat notifications.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐ Notification ┌──────────┐  dequeue  ┌────────────┐  send  ┌───────────┐
//! │ watch.rs │ ───────────► │ queue.rs │ ────────► │ deliver/   │ ─────► │ SMTP /    │
//! │(per feed)│  (enqueue)   │ (bounded)│ ◄──────── │ (1 worker) │        │ Telegram  │
//! └──────────┘              └──────────┘  requeue  └────────────┘        └───────────┘
//!      │ ▲                       │ ▲
//!      ▼ │ seen ids              ▼ │ snapshot at shutdown / startup
//! ┌──────────┐             ┌────────────┐
//! │ store.rs │             │ queue.json │
//! └──────────┘             └────────────┘
//! ```
//!
//! * **`source/`**: the `FeedSource` trait and the RSS implementation.
//! * **`filter`**: per-feed compiled title filters.
//! * **`store`**: per-feed persisted set of already-seen item ids.
//! * **`watch`**: one polling task per feed (fetch, diff, filter, enqueue).
//! * **`queue`**: the bounded notification queue and its snapshot file.
//! * **`deliver/`**: the delivery worker and its transports.
//! * **`main`**: wires everything together, waits for a stop signal and
//!   shuts down without losing queued notifications.

mod config;
mod deliver;
mod error;
mod filter;
mod notification;
mod queue;
mod shutdown;
mod source;
mod store;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, FeedConfig};
use deliver::{build_transport, DeliveryStats, DeliveryWorker};
use filter::FilterSet;
use queue::NotificationQueue;
use source::{FeedSource, RssSource};
use store::ItemStore;
use watch::{FeedWatcher, WatchOutcome, WatchSettings};

#[derive(Debug, Parser)]
#[command(
    name = "feedwatch",
    version,
    about = "Watch RSS feeds and deliver new items as notifications"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Watch feeds and deliver notifications until stopped (default).
    Run,
    /// Validate the configuration, every feed url and every filter, then exit.
    Check,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = Config::load(&args.config)
        .with_context(|| format!("cannot load config from {}", args.config.display()))?;
    debug!(
        feeds = config.feeds.len(),
        transport = config.transport.kind(),
        "configuration loaded"
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => check(&config).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{level}'"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

fn http_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(config.watch.request_timeout())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

fn item_store(config: &Config) -> ItemStore {
    if config.save_feeds {
        ItemStore::new(&config.data_folder)
    } else {
        ItemStore::in_memory()
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run(config: Config) -> Result<()> {
    let client = http_client(&config)?;
    let store = item_store(&config);
    let transport = build_transport(&config.transport, client.clone())
        .context("cannot set up notification transport")?;

    // -- restore what the previous run left behind ---------------------------
    let queue = Arc::new(NotificationQueue::new(config.queue_capacity));
    let queue_file = config.queue_file();
    let restored = queue::load_snapshot(&queue_file)
        .await
        .context("cannot restore notification queue")?;
    if !restored.is_empty() {
        info!(
            count = restored.len(),
            path = %queue_file.display(),
            "restored pending notifications"
        );
    }
    queue.restore(restored);

    // -- start the consumer, then one watcher per feed -----------------------
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(
        DeliveryWorker::new(queue.clone(), transport, &config.delivery)
            .run(shutdown.clone())
            .instrument(info_span!("delivery", transport = config.transport.kind())),
    );

    let settings = WatchSettings::from(&config.watch);
    let mut watchers = JoinSet::new();
    for feed in &config.feeds {
        let span = info_span!("feed", url = %feed.url);
        let started = start_watcher(feed, &client, &store, &queue, &settings, &config)
            .instrument(span.clone())
            .await;
        match started {
            Ok(watcher) => {
                span.in_scope(|| info!("watching"));
                watchers.spawn(watcher.run(shutdown.clone()).instrument(span));
            }
            Err(e) => span.in_scope(|| error!(error = %e, "cannot watch feed")),
        }
    }
    if watchers.is_empty() {
        warn!("no feed could be started, only pending notifications will be delivered");
    }

    // -- block until asked to stop -------------------------------------------
    match shutdown::wait_for_stop_signal().await {
        Ok(signal) => info!(signal, "shutting down"),
        Err(e) => error!(error = %e, "cannot listen for stop signals, shutting down"),
    }

    let pending = shut_down(&shutdown, &queue, worker, watchers, &queue_file).await?;
    info!(pending, path = %queue_file.display(), "notification queue persisted");
    Ok(())
}

/// Stop every task and write whatever is still queued to `queue_file`.
///
/// The worker goes first so nothing is taken off the queue after the
/// snapshot; closing the queue then frees any watcher blocked on it.
/// Returns the number of notifications persisted.
async fn shut_down(
    token: &CancellationToken,
    queue: &NotificationQueue,
    worker: JoinHandle<DeliveryStats>,
    mut watchers: JoinSet<error::Result<WatchOutcome>>,
    queue_file: &Path,
) -> Result<usize> {
    token.cancel();

    match worker.await {
        Ok(stats) => debug!(sent = stats.sent, failed = stats.failed, "delivery worker joined"),
        Err(e) => error!(error = %e, "delivery worker panicked"),
    }
    queue.close();
    while let Some(joined) = watchers.join_next().await {
        match joined {
            Ok(Ok(outcome)) => debug!(?outcome, "watcher joined"),
            Ok(Err(_)) => {} // already reported by the watcher
            Err(e) => error!(error = %e, "watcher panicked"),
        }
    }

    let pending = queue.drain();
    queue::save_snapshot(queue_file, &pending)
        .await
        .context("cannot persist notification queue")?;
    Ok(pending.len())
}

async fn start_watcher(
    feed: &FeedConfig,
    client: &reqwest::Client,
    store: &ItemStore,
    queue: &Arc<NotificationQueue>,
    settings: &WatchSettings,
    config: &Config,
) -> error::Result<FeedWatcher> {
    let source: Box<dyn FeedSource> = Box::new(RssSource::new(
        &feed.url,
        client.clone(),
        config.watch.default_refresh(),
    )?);
    FeedWatcher::start(
        feed.clone(),
        source,
        store.clone(),
        queue.clone(),
        settings.clone(),
    )
    .await
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

async fn check(config: &Config) -> Result<()> {
    build_transport(&config.transport, reqwest::Client::new())
        .context("transport configuration is invalid")?;

    let store = item_store(config);
    let mut failed = 0;
    for feed in &config.feeds {
        match check_feed(feed, &store).await {
            Ok(filters) => println!("ok     {} ({filters} filters)", feed.url),
            Err(e) => {
                failed += 1;
                println!("error  {}: {e}", feed.url);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} feeds are misconfigured", config.feeds.len());
    }
    println!("{} feeds ok", config.feeds.len());
    Ok(())
}

async fn check_feed(feed: &FeedConfig, store: &ItemStore) -> error::Result<usize> {
    let filters = FilterSet::compile(&feed.filters, feed.match_content)?;
    RssSource::new(&feed.url, reqwest::Client::new(), Duration::ZERO)?;
    store.load(&feed.url).await?;
    Ok(filters.len())
}
