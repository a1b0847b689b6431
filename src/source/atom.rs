//! Atom support, parsed with [`feed_rs`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};

use super::rss::refresh_after;
use super::{FeedItem, FeedSnapshot};

/// Convert a parsed Atom feed into a [`FeedSnapshot`].
///
/// Entry ids come from `<id>`; the parser derives a stable one when the
/// document omits it.
pub fn parse_feed(
    feed: &Feed,
    fetched_at: DateTime<Utc>,
    default_refresh: Duration,
) -> FeedSnapshot {
    let items = feed.entries.iter().map(to_item).collect();
    let title = feed
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();

    FeedSnapshot {
        title,
        items,
        next_refresh: fetched_at + refresh_after(feed.ttl.map(u64::from), default_refresh),
    }
}

fn to_item(entry: &Entry) -> FeedItem {
    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .unwrap_or_default();

    FeedItem {
        id: entry.id.trim().to_string(),
        title: entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .unwrap_or_else(|| "(untitled)".to_string()),
        content,
        link: entry.links.first().map(|l| l.href.clone()),
        published: entry.published.or(entry.updated),
    }
}
