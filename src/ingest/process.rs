// src/ingest/process.rs
use std::collections::HashSet;

use crate::ingest::types::{FilterSpec, Item};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub kept: usize,
    pub filtered: usize,
    pub duplicates: usize,
}

/// Accumulates normalized batches across pages: applies the inclusion
/// predicate, drops repeated identities (first occurrence wins), and hands
/// back the result newest first.
#[derive(Debug)]
pub struct PostProcessor {
    filter: FilterSpec,
    seen: HashSet<String>,
    items: Vec<Item>,
    stats: ProcessStats,
}

impl PostProcessor {
    pub fn new(filter: FilterSpec) -> Self {
        Self {
            filter,
            seen: HashSet::new(),
            items: Vec::new(),
            stats: ProcessStats::default(),
        }
    }

    pub fn extend<I: IntoIterator<Item = Item>>(&mut self, batch: I) {
        for item in batch {
            if !self.filter.accepts(&item) {
                self.stats.filtered += 1;
                continue;
            }
            if !self.seen.insert(item.id.clone()) {
                self.stats.duplicates += 1;
                continue;
            }
            self.items.push(item);
        }
        self.stats.kept = self.items.len();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> ProcessStats {
        self.stats
    }

    /// Descending by `published_at`; the sort is stable so equal timestamps
    /// keep fetch order.
    pub fn finish(self) -> (Vec<Item>, ProcessStats) {
        let mut items = self.items;
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        (items, self.stats)
    }
}

/// One-shot form of [`PostProcessor`].
pub fn process(raw_items: Vec<Item>, filter: &FilterSpec) -> (Vec<Item>, ProcessStats) {
    let mut p = PostProcessor::new(filter.clone());
    p.extend(raw_items);
    p.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn item(id: &str, title: &str, published_at: DateTime<Utc>) -> Item {
        Item {
            id: id.into(),
            title: title.into(),
            link: String::new(),
            description: String::new(),
            source_name: "s".into(),
            published_at,
            duration_seconds: Some(4000),
            duration_ms: Some(4_000_000),
            elapsed_label: String::new(),
            duration_label: String::new(),
            thumbnail_url: String::new(),
            content_type: "track".into(),
            author: None,
        }
    }

    #[test]
    fn duplicates_keep_first_seen_fields() {
        let t = Utc::now();
        let raw = vec![
            item("track:1", "first", t),
            item("track:1", "second", t + Duration::hours(1)),
            item("track:1", "third", t - Duration::hours(1)),
        ];
        let (out, stats) = process(raw, &FilterSpec::accept_all());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "first");
        assert_eq!(stats.duplicates, 2);
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn newest_first_with_stable_ties() {
        let t = Utc::now();
        let raw = vec![
            item("a", "a", t - Duration::hours(2)),
            item("b", "b", t),
            item("c", "c", t),
            item("d", "d", t - Duration::minutes(1)),
        ];
        let (out, _) = process(raw, &FilterSpec::accept_all());
        let ids: Vec<_> = out.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d", "a"]);
        assert!(out.windows(2).all(|w| w[0].published_at >= w[1].published_at));
    }

    #[test]
    fn dedup_spans_batches() {
        let t = Utc::now();
        let mut p = PostProcessor::new(FilterSpec::accept_all());
        p.extend(vec![item("x", "page1", t), item("y", "page1", t)]);
        p.extend(vec![item("y", "page2", t), item("z", "page2", t)]);
        assert_eq!(p.len(), 3);
        let (out, stats) = p.finish();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(out.iter().find(|i| i.id == "y").unwrap().title, "page1");
    }

    #[test]
    fn filter_counts_rejections() {
        let t = Utc::now();
        let mut short = item("s", "short", t);
        short.duration_seconds = Some(60);
        short.duration_ms = Some(60_000);
        let mut playlist = item("p", "pl", t);
        playlist.content_type = "playlist".into();
        let filter = FilterSpec {
            min_duration_ms: Some(1_750_000),
            exclude_content_types: vec!["playlist".into()],
        };
        let (out, stats) = process(vec![short, playlist, item("k", "keep", t)], &filter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "k");
        assert_eq!(stats.filtered, 2);
    }
}
