// src/ingest/mod.rs
pub mod config;
pub mod normalize;
pub mod process;
pub mod providers;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::error::IngestError;
use crate::ingest::normalize::{normalize, NormalizeCtx};
use crate::ingest::process::{PostProcessor, ProcessStats};
use crate::ingest::providers::{rss::RssClient, tracks::TrackClient};
use crate::ingest::types::{Item, SourceClient, SourceConfig, SourceKind};

pub use normalize::normalize_text;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_pages_total", "Pages (or feed passes) fetched from upstreams.");
        describe_counter!("ingest_records_total", "Raw records received from upstreams.");
        describe_counter!("ingest_feed_errors_total", "Feeds skipped because they failed.");
        describe_counter!(
            "ingest_source_errors_total",
            "Refreshes whose first fetch failed outright."
        );
        describe_counter!("ingest_filtered_total", "Items dropped by the inclusion predicate.");
        describe_counter!("ingest_dedup_total", "Items dropped as repeated identities.");
        describe_histogram!("ingest_collect_ms", "Full collect time in milliseconds.");
    });
}

/// Result of one full pass over a source.
#[derive(Debug)]
pub struct Harvest {
    /// Filtered, deduplicated, newest first.
    pub items: Vec<Item>,
    pub pages: usize,
    pub skipped_feeds: usize,
    pub stats: ProcessStats,
}

/// A configured upstream together with the client that speaks to it.
pub struct Source {
    pub config: SourceConfig,
    client: Arc<dyn SourceClient>,
}

impl Source {
    pub fn new(config: SourceConfig, client: Arc<dyn SourceClient>) -> Self {
        Self { config, client }
    }

    /// Pick the client variant described by `config.kind`.
    pub fn from_config(config: SourceConfig, http: reqwest::Client) -> Self {
        let client: Arc<dyn SourceClient> = match &config.kind {
            SourceKind::Rss { feeds } => {
                Arc::new(RssClient::new(config.name.clone(), feeds.clone(), http))
            }
            SourceKind::Tracks { endpoint, query } => Arc::new(TrackClient::new(
                config.name.clone(),
                endpoint.clone(),
                query.clone(),
                config.credentials.clone(),
                http,
            )),
        };
        Self::new(config, client)
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }

    /// Fetch → normalize → post-process until `target_count` post-filter
    /// items are collected, a page comes back empty, or `max_pages` is hit.
    ///
    /// A failing first page is an error (nothing usable). A later failing
    /// page ends pagination and keeps what was already collected.
    pub async fn collect(&self, now: DateTime<Utc>) -> Result<Harvest, IngestError> {
        ensure_metrics_described();
        let t0 = std::time::Instant::now();

        let cfg = &self.config;
        let key = cfg.key.clone();
        let page_size = cfg.page_size.max(1);
        let max_pages = if cfg.is_paginated() {
            cfg.max_pages.max(1)
        } else {
            1
        };
        let ctx = NormalizeCtx {
            source_name: &cfg.name,
            now,
        };

        let mut processor = PostProcessor::new(cfg.filter.clone());
        let mut offset = 0usize;
        let mut pages = 0usize;
        let mut skipped_feeds = 0usize;

        while pages < max_pages {
            let page = match self.client.fetch_page(offset, page_size).await {
                Ok(p) => p,
                Err(e) if pages == 0 => {
                    counter!("ingest_source_errors_total", "key" => key.clone()).increment(1);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", key = %key, offset, error = %e, "page fetch failed, treating as end of data");
                    break;
                }
            };
            pages += 1;
            skipped_feeds += page.skipped;
            counter!("ingest_pages_total", "key" => key.clone()).increment(1);

            if page.records.is_empty() {
                tracing::debug!(target: "ingest", key = %key, offset, "upstream exhausted");
                break;
            }
            counter!("ingest_records_total", "key" => key.clone())
                .increment(page.records.len() as u64);

            processor.extend(page.records.into_iter().map(|r| normalize(r, &ctx)));
            if processor.len() >= cfg.target_count {
                break;
            }
            offset += page_size;
        }

        let (items, stats) = processor.finish();
        counter!("ingest_filtered_total", "key" => key.clone()).increment(stats.filtered as u64);
        counter!("ingest_dedup_total", "key" => key.clone()).increment(stats.duplicates as u64);
        histogram!("ingest_collect_ms", "key" => key.clone())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        tracing::info!(
            target: "ingest",
            key = %key,
            kept = items.len(),
            pages,
            skipped_feeds,
            filtered = stats.filtered,
            dedup = stats.duplicates,
            "collect finished"
        );

        Ok(Harvest {
            items,
            pages,
            skipped_feeds,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::providers::tracks::{Track, TrackEntry};
    use crate::ingest::types::{Credentials, FilterSpec, Page, RawRecord};
    use std::sync::Mutex;

    /// Serves canned pages by index and records requested offsets.
    struct Scripted {
        pages: Vec<Result<Vec<(u64, u64)>, ()>>,
        offsets: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl SourceClient for Scripted {
        async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page, IngestError> {
            self.offsets.lock().unwrap().push(offset);
            let idx = offset / limit;
            match self.pages.get(idx) {
                None => Ok(Page::default()),
                Some(Err(())) => Err(IngestError::Decode {
                    url: format!("page-{idx}"),
                    reason: "boom".into(),
                }),
                Some(Ok(tracks)) => Ok(Page {
                    records: tracks
                        .iter()
                        .map(|&(id, secs)| {
                            RawRecord::Track(TrackEntry {
                                kind: Some("track".into()),
                                track: Some(Track {
                                    id,
                                    title: Some(format!("t{id}")),
                                    duration: Some(secs * 1000),
                                    created_at: Some(format!("2024-01-01T00:00:{:02}Z", id % 60)),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            })
                        })
                        .collect(),
                    skipped: 0,
                }),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn source(pages: Vec<Result<Vec<(u64, u64)>, ()>>, target: usize) -> (Source, Arc<Scripted>) {
        let client = Arc::new(Scripted {
            pages,
            offsets: Mutex::new(Vec::new()),
        });
        let cfg = SourceConfig {
            key: "tracks-stream".into(),
            name: "Stream".into(),
            kind: SourceKind::Tracks {
                endpoint: "http://unused".into(),
                query: vec![],
            },
            credentials: Credentials::new(),
            page_size: 2,
            target_count: target,
            max_pages: 10,
            filter: FilterSpec {
                min_duration_ms: Some(1_750_000),
                exclude_content_types: vec!["playlist".into()],
            },
        };
        (Source::new(cfg, client.clone()), client)
    }

    #[tokio::test]
    async fn paginates_until_target_reached_after_filtering() {
        // Page 0: one long, one short. Page 1: overlap + one long. Page 2 never needed.
        let (src, client) = source(
            vec![
                Ok(vec![(1, 3600), (2, 60)]),
                Ok(vec![(1, 3600), (3, 2000)]),
                Ok(vec![(4, 2000), (5, 2000)]),
            ],
            2,
        );
        let h = src.collect(Utc::now()).await.unwrap();
        assert_eq!(h.pages, 2);
        assert_eq!(*client.offsets.lock().unwrap(), vec![0, 2]);
        let ids: Vec<_> = h.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["track:3", "track:1"]);
        assert_eq!(h.stats.duplicates, 1);
        assert_eq!(h.stats.filtered, 1);
    }

    #[tokio::test]
    async fn stops_when_upstream_exhausted() {
        let (src, client) = source(vec![Ok(vec![(1, 3600)])], 100);
        let h = src.collect(Utc::now()).await.unwrap();
        assert_eq!(h.items.len(), 1);
        assert_eq!(*client.offsets.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn later_page_failure_keeps_partial_result() {
        let (src, _) = source(vec![Ok(vec![(1, 3600), (2, 3600)]), Err(())], 100);
        let h = src.collect(Utc::now()).await.unwrap();
        assert_eq!(h.items.len(), 2);
    }

    #[tokio::test]
    async fn first_page_failure_is_error() {
        let (src, _) = source(vec![Err(())], 100);
        let err = src.collect(Utc::now()).await.unwrap_err();
        assert!(err.is_decode());
    }
}
