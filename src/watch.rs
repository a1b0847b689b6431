//! Background feed watching.
//!
//! Every configured feed gets its own [`FeedWatcher`] running as an
//! independent task.  A watcher owns its feed's seen set, filters and last
//! snapshot outright; the only thing it shares with the rest of the process is
//! the [`NotificationQueue`] it pushes matches into.
//!
//! ```text
//!  ┌───────────┐ fetch ok  ┌──────────────┐ new + matched ┌───────────────────┐
//!  │ Fetching  │ ────────► │ diff / filter│ ────────────► │ NotificationQueue │
//!  └───────────┘           └──────────────┘               └───────────────────┘
//!     ▲    │ fetch err            │ save seen set
//!     │    ▼                      ▼
//!     │  backoff ─────────► Idle (sleep until next refresh + jitter)
//!     └───────────────────────────┘
//! ```
//!
//! A feed that fails `disable_threshold` times in a row is disabled and its
//! task ends.  Failing to persist the seen set also ends the task, since
//! duplicates could no longer be ruled out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FeedConfig, WatchConfig};
use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::notification::Notification;
use crate::queue::NotificationQueue;
use crate::shutdown::sleep_or_cancel;
use crate::source::{FeedSnapshot, FeedSource};
use crate::store::{ItemStore, SeenSet};

/// Scheduling parameters for a watcher.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub backoff_unit: Duration,
    pub disable_threshold: u32,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl From<&WatchConfig> for WatchSettings {
    fn from(config: &WatchConfig) -> Self {
        Self {
            backoff_unit: config.backoff_unit(),
            disable_threshold: config.disable_threshold,
            jitter_min: Duration::from_millis(config.jitter_min_ms),
            jitter_max: Duration::from_millis(config.jitter_max_ms),
        }
    }
}

impl WatchSettings {
    fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..max))
    }
}

/// Delay before the next attempt after `errors` consecutive failures.
///
/// Linear rather than exponential: a flapping feed gets shed, but never
/// blacked out for hours.
pub fn retry_delay(errors: u32, unit: Duration) -> Duration {
    unit.saturating_mul(errors)
}

/// How a watcher task ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Too many consecutive fetch failures.
    Disabled,
    /// Shutdown was requested.
    Stopped,
}

/// Mutable runtime state of one feed.
#[derive(Debug, Default)]
pub struct FeedState {
    snapshot: Option<FeedSnapshot>,
    errors: u32,
}

impl FeedState {
    #[cfg(test)]
    pub fn errors(&self) -> u32 {
        self.errors
    }
}

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    RetryAt(DateTime<Utc>),
    Disable,
}

pub struct FeedWatcher {
    feed: FeedConfig,
    source: Box<dyn FeedSource>,
    filters: FilterSet,
    store: ItemStore,
    seen: SeenSet,
    state: FeedState,
    queue: Arc<NotificationQueue>,
    settings: WatchSettings,
}

impl FeedWatcher {
    /// Compile the feed's filters and load its seen set.
    ///
    /// Any error here only concerns this feed.
    pub async fn start(
        feed: FeedConfig,
        source: Box<dyn FeedSource>,
        store: ItemStore,
        queue: Arc<NotificationQueue>,
        settings: WatchSettings,
    ) -> Result<Self> {
        let filters = FilterSet::compile(&feed.filters, feed.match_content)?;
        let seen = store.load(source.url()).await?;
        debug!(filters = filters.len(), seen = seen.len(), "watcher ready");

        Ok(Self {
            feed,
            source,
            filters,
            store,
            seen,
            state: FeedState::default(),
            queue,
            settings,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> &FeedState {
        &self.state
    }

    #[cfg(test)]
    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Poll until the feed is disabled or `shutdown` fires.
    ///
    /// An in-flight fetch is never interrupted; only sleeps are.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<WatchOutcome> {
        let mut next_poll = Utc::now();

        loop {
            let wait = until(next_poll) + self.settings.jitter();
            debug!(?wait, "sleeping until next poll");
            if !sleep_or_cancel(wait, &shutdown).await {
                return Ok(WatchOutcome::Stopped);
            }

            match self.source.fetch().await {
                Ok(snapshot) => {
                    let previous = self.state.snapshot.as_ref().map(|s| s.title.as_str());
                    if previous != Some(snapshot.title.as_str()) {
                        info!(
                            title = %snapshot.title,
                            items = snapshot.items.len(),
                            "feed fetched"
                        );
                    }
                    self.state.errors = 0;
                    next_poll = snapshot.next_refresh;
                    match self.process(&snapshot).await {
                        Ok(0) => debug!("no new matches"),
                        Ok(count) => info!(count, "queued notifications"),
                        Err(Error::QueueClosed) => {
                            info!("queue closed, stopping");
                            return Ok(WatchOutcome::Stopped);
                        }
                        Err(e) => {
                            error!(error = %e, "cannot persist seen items, stopping watcher");
                            return Err(e);
                        }
                    }
                    self.state.snapshot = Some(snapshot);
                }
                Err(e) => match self.record_failure(Utc::now()) {
                    FailureAction::RetryAt(at) => {
                        warn!(
                            error = %e,
                            errors = self.state.errors,
                            retry_at = %at,
                            "fetch failed"
                        );
                        next_poll = at;
                    }
                    FailureAction::Disable => {
                        error!(
                            error = %e,
                            errors = self.state.errors,
                            "too many consecutive errors, disabling feed"
                        );
                        return Ok(WatchOutcome::Disabled);
                    }
                },
            }

            if shutdown.is_cancelled() {
                return Ok(WatchOutcome::Stopped);
            }
        }
    }

    /// Queue a notification for every new item and filter match, then
    /// persist the seen set.
    ///
    /// Items are marked seen whether or not a filter matched.  Returns the
    /// number of notifications queued.  An item's notifications are queued
    /// together or not at all; on [`Error::QueueClosed`] the item being
    /// processed stays unseen and everything before it is persisted.
    pub async fn process(&mut self, snapshot: &FeedSnapshot) -> Result<usize> {
        let mut queued = 0;

        for item in &snapshot.items {
            if self.seen.contains(&item.id) {
                continue;
            }
            debug!(id = %item.id, title = %item.title, "new item");

            let batch: Vec<Notification> = self
                .filters
                .matches(item)
                .into_iter()
                .map(|filter| {
                    Notification::new(
                        &self.feed.url,
                        &snapshot.title,
                        &self.feed.folder,
                        filter,
                        item.clone(),
                    )
                })
                .collect();
            let count = batch.len();
            if let Err(e) = self.queue.enqueue_all(batch).await {
                self.store.save(&self.feed.url, &self.seen).await?;
                return Err(e);
            }
            queued += count;

            self.seen.mark(item.id.as_str());
        }

        self.store.save(&self.feed.url, &self.seen).await?;
        Ok(queued)
    }

    fn record_failure(&mut self, now: DateTime<Utc>) -> FailureAction {
        self.state.errors += 1;
        if self.state.errors >= self.settings.disable_threshold {
            return FailureAction::Disable;
        }
        let delay = retry_delay(self.state.errors, self.settings.backoff_unit);
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
        FailureAction::RetryAt(now + delay)
    }
}

/// Time left until `at`, zero if it already passed.
fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
