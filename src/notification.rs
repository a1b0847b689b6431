//! The unit of work passed from feed watchers to the delivery worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::MATCH_ALL;
use crate::source::FeedItem;

/// A filter-matched item waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub feed_url: String,
    pub feed_title: String,
    pub folder: String,
    /// The filter pattern that matched.
    pub filter: String,
    pub item: FeedItem,
    /// HTML body shared by every transport.
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        feed_url: impl Into<String>,
        feed_title: &str,
        folder: impl Into<String>,
        filter: impl Into<String>,
        item: FeedItem,
    ) -> Self {
        let feed_title = one_line(feed_title);
        let body = render_body(&feed_title, &item);
        Self {
            feed_url: feed_url.into(),
            feed_title,
            folder: folder.into(),
            filter: filter.into(),
            item,
            body,
            created_at: Utc::now(),
        }
    }

    /// Item title flattened to a single line.
    pub fn subject(&self) -> String {
        one_line(&self.item.title)
    }

    /// False for the implicit match-everything filter.
    pub fn has_explicit_filter(&self) -> bool {
        self.filter != MATCH_ALL
    }
}

fn render_body(feed_title: &str, item: &FeedItem) -> String {
    let mut body = format!("{} - {}<br>\n", feed_title, one_line(&item.title));
    body.push_str(item.content.trim());
    if let Some(link) = &item.link {
        body.push_str("<br>\n");
        body.push_str(&format!(r#"<a href="{}">Link</a>"#, link.trim()));
    }
    body
}

/// Trim and collapse line breaks so the text is safe in a header.
pub fn one_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::make_item;

    pub fn make_notification(id: &str) -> Notification {
        Notification::new(
            "https://example.com/feed.xml",
            "Example",
            "misc",
            MATCH_ALL,
            make_item(id, &format!("Item {id}")),
        )
    }

    #[test]
    fn body_contains_titles_content_and_link() {
        let mut item = make_item("1", " Hello\nWorld ");
        item.content = "  <p>Body</p> ".to_string();

        let n = Notification::new("u", " Feed\n", "folder", "x", item);

        assert_eq!(n.feed_title, "Feed");
        assert_eq!(
            n.body,
            "Feed - Hello World<br>\n<p>Body</p><br>\n<a href=\"https://example.com/1\">Link</a>"
        );
    }

    #[test]
    fn body_without_link_has_no_anchor() {
        let mut item = make_item("1", "T");
        item.link = None;

        let n = Notification::new("u", "F", "", MATCH_ALL, item);
        assert!(!n.body.contains("<a href"));
        assert!(!n.has_explicit_filter());
    }

    #[test]
    fn subject_is_single_line() {
        let n = Notification::new("u", "F", "", "x", make_item("1", "a\r\n  b\n"));
        assert_eq!(n.subject(), "a b");
        assert!(n.has_explicit_filter());
    }
}
