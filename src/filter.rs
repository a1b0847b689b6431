//! Per-feed title filters.
//!
//! Patterns are compiled once when a watcher starts and owned by that watcher
//! for its whole life, so matching needs no locking.

use regex::Regex;

use crate::error::{Error, Result};
use crate::source::FeedItem;

/// Pattern used when a feed configures no filters.
pub const MATCH_ALL: &str = ".*";

#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pattern: String,
    regex: Regex,
}

impl CompiledFilter {
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::Filter {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// The compiled filters of one feed, in configured order.
#[derive(Debug, Clone)]
pub struct FilterSet {
    filters: Vec<CompiledFilter>,
    match_content: bool,
}

impl FilterSet {
    /// Compile `patterns`. An empty list behaves as a single `.*`; repeated
    /// patterns are compiled once.
    pub fn compile<S: AsRef<str>>(patterns: &[S], match_content: bool) -> Result<Self> {
        let mut filters: Vec<CompiledFilter> = Vec::with_capacity(patterns.len().max(1));
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if filters.iter().any(|f| f.pattern == pattern) {
                continue;
            }
            filters.push(CompiledFilter::compile(pattern)?);
        }
        if filters.is_empty() {
            filters.push(CompiledFilter::compile(MATCH_ALL)?);
        }

        Ok(Self {
            filters,
            match_content,
        })
    }

    /// Patterns that match `item`, in configured order.
    pub fn matches(&self, item: &FeedItem) -> Vec<&str> {
        self.filters
            .iter()
            .filter(|f| {
                f.regex.is_match(&item.title)
                    || (self.match_content && f.regex.is_match(&item.content))
            })
            .map(CompiledFilter::pattern)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::make_item;

    #[test]
    fn empty_pattern_list_matches_everything() {
        let filters = FilterSet::compile::<&str>(&[], false).unwrap();
        assert_eq!(filters.len(), 1);

        let hits = filters.matches(&make_item("1", "anything at all"));
        assert_eq!(hits, vec![MATCH_ALL]);

        let hits = filters.matches(&make_item("2", ""));
        assert_eq!(hits, vec![MATCH_ALL], "even an empty title matches");
    }

    #[test]
    fn returns_every_matching_pattern_in_order() {
        let filters = FilterSet::compile(&["(?i)rust", "release", "python"], false).unwrap();
        let item = make_item("1", "Rust 1.80 release notes");

        let hits = filters.matches(&item);
        assert_eq!(hits, vec!["(?i)rust", "release"]);
    }

    #[test]
    fn non_matching_item_yields_nothing() {
        let filters = FilterSet::compile(&["^Talk:"], false).unwrap();
        assert!(filters.matches(&make_item("1", "Article")).is_empty());
    }

    #[test]
    fn duplicate_patterns_compile_once() {
        let filters = FilterSet::compile(&[".*", ".*", "x"], false).unwrap();
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn content_only_consulted_when_enabled() {
        let mut item = make_item("1", "Weekly digest");
        item.content = "this week: tokio 2.0".to_string();

        let title_only = FilterSet::compile(&["tokio"], false).unwrap();
        assert!(title_only.matches(&item).is_empty());

        let with_content = FilterSet::compile(&["tokio"], true).unwrap();
        assert_eq!(with_content.matches(&item), vec!["tokio"]);
    }

    #[test]
    fn invalid_pattern_is_reported_with_the_pattern() {
        let err = FilterSet::compile(&["ok", "(unclosed"], false).unwrap_err();
        match err {
            Error::Filter { pattern, .. } => assert_eq!(pattern, "(unclosed"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
