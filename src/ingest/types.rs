// src/ingest/types.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::ingest::providers::rss::RssItem;
use crate::ingest::providers::tracks::TrackEntry;

/// Canonical content unit served to the front end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: String,           // dedup identity, e.g. "track:123", "rss:ab12cd34ef56"
    pub title: String,
    pub link: String,
    pub description: String,  // plain text
    pub source_name: String,  // feed or source display name
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    /// Upstream length before truncation to seconds; filters compare on this.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub elapsed_label: String,  // "3 hours ago"
    #[serde(default)]
    pub duration_label: String, // "1h 12m", empty for articles
    #[serde(default)]
    pub thumbnail_url: String,
    pub content_type: String,   // "article", "track", "track-repost", "playlist", ...
    #[serde(default)]
    pub author: Option<String>,
}

/// Source-specific record as it came off the wire, before normalization.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Rss { feed: String, item: RssItem },
    Track(TrackEntry),
}

/// One fetch worth of raw records.
#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Feeds skipped because they failed during this fetch.
    pub skipped: usize,
}

/// Capability shared by every upstream variant.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page, IngestError>;
    fn name(&self) -> &str;
}

/// Opaque credential set; values are injected into endpoint templates and headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank values are not stored.
    pub fn with(mut self, name: &str, value: Option<String>) -> Self {
        if let Some(v) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            self.0.insert(name.to_string(), v);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Fixed list of feeds fetched in one pass.
    Rss { feeds: Vec<FeedConfig> },
    /// Paginated JSON listing. `endpoint` and query values may contain
    /// `{offset}`, `{limit}` and `{<credential>}` placeholders.
    Tracks {
        endpoint: String,
        query: Vec<(String, String)>,
    },
}

/// Inclusion predicate applied after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    /// Keep only items strictly longer than this many milliseconds.
    pub min_duration_ms: Option<u64>,
    /// Drop items whose content type contains any of these.
    pub exclude_content_types: Vec<String>,
}

impl FilterSpec {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn accepts(&self, item: &Item) -> bool {
        if let Some(floor) = self.min_duration_ms {
            match item.duration_ms {
                Some(d) if d > floor => {}
                _ => return false,
            }
        }
        !self
            .exclude_content_types
            .iter()
            .any(|t| item.content_type.contains(t.as_str()))
    }
}

/// Static description of one upstream and the cache key it feeds.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub key: String,
    pub name: String,
    pub kind: SourceKind,
    pub credentials: Credentials,
    pub page_size: usize,
    /// Minimum post-filter items wanted before pagination stops.
    pub target_count: usize,
    pub max_pages: usize,
    pub filter: FilterSpec,
}

impl SourceConfig {
    pub fn is_paginated(&self) -> bool {
        matches!(self.kind, SourceKind::Tracks { .. })
    }
}
