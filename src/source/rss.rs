//! RSS feed source implementation.
//!
//! Fetches a feed document over HTTP with [`reqwest`] and parses it with the
//! [`rss`] crate.  Documents that are not RSS are handed to the Atom parser
//! in [`super::atom`].  The parsing half is pure so tests can exercise it
//! without hitting the network.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{atom, FeedItem, FeedSnapshot, FeedSource};
use crate::error::{Error, Result};
use crate::store::fingerprint;

/// An RSS feed data source.
pub struct RssSource {
    url: String,
    client: reqwest::Client,
    /// Used when the channel has no `<ttl>`.
    default_refresh: Duration,
}

impl RssSource {
    /// Create a new RSS source.
    ///
    /// The URL is validated here so a malformed entry fails its watcher at
    /// startup instead of being retried forever.
    pub fn new(
        url: impl Into<String>,
        client: reqwest::Client,
        default_refresh: Duration,
    ) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).map_err(|source| Error::InvalidUrl {
            url: url.clone(),
            source,
        })?;
        Ok(Self {
            url,
            client,
            default_refresh,
        })
    }

    /// Parse a fetched document, RSS first, then Atom.
    ///
    /// When neither format fits, the RSS error is returned.
    pub fn parse_document(
        body: &[u8],
        fetched_at: DateTime<Utc>,
        default_refresh: Duration,
    ) -> Result<FeedSnapshot> {
        match rss::Channel::read_from(body) {
            Ok(channel) => Ok(Self::parse_channel(&channel, fetched_at, default_refresh)),
            Err(rss_error) => match feed_rs::parser::parse(body) {
                Ok(feed) => Ok(atom::parse_feed(&feed, fetched_at, default_refresh)),
                Err(e) => {
                    debug!(error = %e, "document is neither RSS nor Atom");
                    Err(rss_error.into())
                }
            },
        }
    }

    /// Parse an already-fetched [`rss::Channel`] into a [`FeedSnapshot`].
    ///
    /// `fetched_at` anchors the advertised refresh time.
    pub fn parse_channel(
        channel: &rss::Channel,
        fetched_at: DateTime<Utc>,
        default_refresh: Duration,
    ) -> FeedSnapshot {
        let items = channel
            .items()
            .iter()
            .map(|item| {
                let title = item.title().unwrap_or("(untitled)").trim().to_string();

                // Prefer <guid>, fall back to <link>, the title, then a hash
                // of the body.
                let id = [item.guid().map(|g| g.value()), item.link(), item.title()]
                    .into_iter()
                    .flatten()
                    .map(str::trim)
                    .find(|candidate| !candidate.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| body_fingerprint(item));

                // Parse RFC-2822 date; gracefully degrade to None on failure.
                let published = item
                    .pub_date()
                    .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                    .map(|dt| dt.with_timezone(&Utc));

                FeedItem {
                    id,
                    title,
                    content: item
                        .content()
                        .or_else(|| item.description())
                        .unwrap_or_default()
                        .to_string(),
                    link: item.link().map(String::from),
                    published,
                }
            })
            .collect();

        FeedSnapshot {
            title: channel.title().trim().to_string(),
            items,
            next_refresh: fetched_at + refresh_interval(channel, default_refresh),
        }
    }
}

fn body_fingerprint(item: &rss::Item) -> String {
    let body = [item.description(), item.content(), item.pub_date()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");
    fingerprint(body.as_bytes())
}

/// How long the channel asks clients to wait, from `<ttl>` (minutes).
fn refresh_interval(channel: &rss::Channel, default_refresh: Duration) -> chrono::Duration {
    let ttl = channel.ttl().and_then(|ttl| ttl.trim().parse::<u64>().ok());
    refresh_after(ttl, default_refresh)
}

/// `ttl_minutes` when positive, otherwise `default_refresh`.
pub(super) fn refresh_after(
    ttl_minutes: Option<u64>,
    default_refresh: Duration,
) -> chrono::Duration {
    let interval = ttl_minutes
        .filter(|minutes| *minutes > 0)
        .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
        .unwrap_or(default_refresh);
    chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::minutes(10))
}

#[async_trait]
impl FeedSource for RssSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<FeedSnapshot> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let snapshot = Self::parse_document(&body, Utc::now(), self.default_refresh)?;
        debug!(
            items = snapshot.items.len(),
            next_refresh = %snapshot.next_refresh,
            "parsed feed"
        );
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    fn parse(xml: &str) -> FeedSnapshot {
        let channel = rss::Channel::read_from(xml.as_bytes()).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        RssSource::parse_channel(&channel, now, TEN_MINUTES)
    }

    #[test]
    fn parse_channel_extracts_items() {
        let snapshot = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title> Test Feed </title>
    <item>
      <title>First Post</title>
      <link>https://example.com/1</link>
      <guid>guid-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
      <description>First description</description>
    </item>
    <item>
      <title>Second Post</title>
      <link>https://example.com/2</link>
      <guid>guid-2</guid>
    </item>
  </channel>
</rss>"#,
        );

        assert_eq!(snapshot.title, "Test Feed");
        assert_eq!(snapshot.items.len(), 2);

        assert_eq!(snapshot.items[0].id, "guid-1");
        assert_eq!(snapshot.items[0].title, "First Post");
        assert_eq!(snapshot.items[0].link.as_deref(), Some("https://example.com/1"));
        assert_eq!(snapshot.items[0].content, "First description");
        assert!(snapshot.items[0].published.is_some());

        assert_eq!(snapshot.items[1].id, "guid-2");
        assert!(snapshot.items[1].content.is_empty());
    }

    #[test]
    fn falls_back_to_link_then_title_for_id() {
        let snapshot = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item>
      <title>No GUID</title>
      <link>https://example.com/no-guid</link>
    </item>
    <item>
      <title>Only a title</title>
    </item>
  </channel>
</rss>"#,
        );

        assert_eq!(snapshot.items[0].id, "https://example.com/no-guid");
        assert_eq!(snapshot.items[1].id, "Only a title");
    }

    #[test]
    fn items_without_identity_fall_back_to_a_body_hash() {
        let snapshot = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item><description>first body</description></item>
    <item><description>second body</description></item>
    <item><description>first body</description></item>
  </channel>
</rss>"#,
        );

        let ids: Vec<_> = snapshot.items.iter().map(|i| i.id.as_str()).collect();
        assert_ne!(ids[0], "(untitled)");
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ids[0], ids[2], "same body, same id across polls");
    }

    #[test]
    fn atom_documents_are_accepted() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let snapshot = RssSource::parse_document(
            br#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Revision history</title>
  <id>urn:feed</id>
  <updated>2025-01-01T00:00:00Z</updated>
  <entry>
    <id>urn:entry:1</id>
    <title>Edit one</title>
    <updated>2025-01-01T00:00:00Z</updated>
    <link href="https://example.com/diff/1"/>
  </entry>
</feed>"#,
            now,
            TEN_MINUTES,
        )
        .unwrap();

        assert_eq!(snapshot.title, "Revision history");
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].id, "urn:entry:1");
        assert_eq!(snapshot.items[0].title, "Edit one");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let err = RssSource::parse_document(b"<html>nope</html>", now, TEN_MINUTES).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn handles_missing_title_and_invalid_date() {
        let snapshot = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item>
      <guid>g1</guid>
      <pubDate>not-a-real-date</pubDate>
    </item>
  </channel>
</rss>"#,
        );

        assert_eq!(snapshot.items[0].title, "(untitled)");
        assert!(snapshot.items[0].published.is_none());
    }

    #[test]
    fn ttl_sets_next_refresh() {
        let snapshot = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <ttl>30</ttl>
  </channel>
</rss>"#,
        );

        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 0, 30, 0).unwrap();
        assert_eq!(snapshot.next_refresh, expected);
    }

    #[test]
    fn missing_ttl_uses_default_refresh() {
        let snapshot = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <ttl>soon</ttl>
  </channel>
</rss>"#,
        );

        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap();
        assert_eq!(snapshot.next_refresh, expected);
    }

    #[test]
    fn new_rejects_malformed_url() {
        let err = RssSource::new("not a url", reqwest::Client::new(), TEN_MINUTES)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn url_returns_configured_url() {
        let src = RssSource::new(
            "http://example.com/feed",
            reqwest::Client::new(),
            TEN_MINUTES,
        )
        .unwrap();
        assert_eq!(src.url(), "http://example.com/feed");
    }
}
