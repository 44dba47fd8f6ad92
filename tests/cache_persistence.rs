// tests/cache_persistence.rs
//
// File-backed snapshots survive a restart of the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use feed_aggregator::cache::orchestrator::{CacheOrchestrator, Freshness, RefreshOutcome};
use feed_aggregator::cache::{CacheBackend, CacheStore, FileStore};
use feed_aggregator::ingest::config::{sources_for, KEY_NEWS};
use feed_aggregator::ingest::providers::build_http_client;
use feed_aggregator::ingest::types::{Credentials, FeedConfig};
use feed_aggregator::ingest::Source;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HN_XML: &str = include_str!("fixtures/hn_rss.xml");

fn orchestrator(store: Arc<dyn CacheStore>, server: &MockServer) -> CacheOrchestrator {
    let feeds = vec![FeedConfig {
        name: "Hacker News".into(),
        url: format!("{}/rss", server.uri()),
    }];
    let http = build_http_client(Duration::from_secs(5)).unwrap();
    let news = sources_for(&feeds, &Credentials::new(), &server.uri())
        .into_iter()
        .find(|s| s.key == KEY_NEWS)
        .unwrap();
    CacheOrchestrator::builder(store)
        .source(Source::from_config(news, http))
        .ttl(Duration::from_secs(3600))
        .build()
}

#[tokio::test]
async fn snapshot_is_reused_after_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(HN_XML.as_bytes().to_vec(), "application/rss+xml"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let backend = CacheBackend::File(dir.path().to_path_buf());

    let first = orchestrator(backend.open(), &server);
    let outcome = first.refresh(KEY_NEWS).await;
    assert_eq!(outcome, RefreshOutcome::Committed { items: 3 });
    assert!(dir.path().join("news.json").exists());
    drop(first);

    let second = orchestrator(backend.open(), &server);
    assert_eq!(second.freshness(KEY_NEWS).await, Freshness::Fresh);
    let read = second.read(KEY_NEWS).await.unwrap();
    assert_eq!(read.freshness, Freshness::Fresh);
    assert_eq!(read.entry.unwrap().items.len(), 3);
}

#[tokio::test]
async fn warm_skips_fresh_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(HN_XML.as_bytes().to_vec(), "application/rss+xml"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache = orchestrator(Arc::new(FileStore::new(dir.path())), &server);

    let first = cache.warm().await;
    assert_eq!(first.len(), 1);
    let second = cache.warm().await;
    assert!(second.is_empty(), "fresh keys are not refreshed again");
}
