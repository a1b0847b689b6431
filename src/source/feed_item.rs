//! The item and snapshot types shared by every feed source.
//!
//! `FeedItem` is a single entry as the rest of the crate sees it.  Every
//! source converts its native format into `FeedItem`s, so deduplication,
//! filtering and rendering stay source-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single feed entry, normalised from any data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Identifier used for de-duplication.
    ///
    /// Must stay stable across polls.  For RSS this is the `<guid>`
    /// (falling back to `<link>`, then the title).
    pub id: String,

    /// Human-readable headline.
    pub title: String,

    /// Full content if the feed has it, otherwise the summary.  May be empty.
    #[serde(default)]
    pub content: String,

    /// URL to the full content.
    #[serde(default)]
    pub link: Option<String>,

    /// Publication timestamp, if the source provided a parseable one.
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

/// The state of a feed as returned by one successful fetch.
///
/// Each poll replaces the previous snapshot wholesale.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// Channel title.
    pub title: String,
    /// Items in feed order.
    pub items: Vec<FeedItem>,
    /// When the feed asks to be polled again.
    pub next_refresh: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Shorthand constructor for tests across the crate.
    pub fn make_item(id: &str, title: &str) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            title: title.to_string(),
            content: String::new(),
            link: Some(format!("https://example.com/{id}")),
            published: None,
        }
    }

    #[test]
    fn item_survives_json_without_optional_fields() {
        let item: FeedItem = serde_json::from_str(r#"{"id":"a","title":"A"}"#).unwrap();
        assert_eq!(item.id, "a");
        assert!(item.content.is_empty());
        assert!(item.link.is_none());
        assert!(item.published.is_none());
    }
}
