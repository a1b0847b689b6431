//! Feed source abstraction layer.
//!
//! This module defines the [`FeedSource`] trait and the common [`FeedItem`] /
//! [`FeedSnapshot`] types.  Concrete implementations live in sub-modules
//! (currently only [`rss`], which also understands Atom through [`atom`]).
//!
//! ## Adding a new source
//!
//! 1. Create a new file in this directory (e.g. `jsonfeed.rs`).
//! 2. Define a struct and implement [`FeedSource`] for it.
//! 3. Add `mod jsonfeed;` below and re-export the struct.
//! 4. Construct it in `main.rs` when building watchers.
//!
//! Watching, de-duplication, filtering and delivery are all source-agnostic.

mod atom;
mod feed_item;
mod rss;

pub use feed_item::{FeedItem, FeedSnapshot};
pub use self::rss::RssSource;

#[cfg(test)]
pub(crate) use feed_item::tests::make_item;

use async_trait::async_trait;

use crate::error::Result;

/// Trait that every feed source must implement.
///
/// Each feed watcher owns one source and calls
/// [`fetch()`](FeedSource::fetch) from its own task, so implementations must
/// be [`Send`] and [`Sync`].
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// The feed URL, used for logging and to name the feed's seen file.
    fn url(&self) -> &str;

    /// Fetch the current state of the feed.
    ///
    /// Errors are treated as transient by the watcher and retried with
    /// backoff.
    async fn fetch(&self) -> Result<FeedSnapshot>;
}
