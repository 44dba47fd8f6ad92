// src/ingest/scheduler.rs
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::orchestrator::{CacheOrchestrator, RefreshOutcome};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    /// Refresh Missing/Stale keys once before the first tick.
    pub warm_on_start: bool,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            warm_on_start: true,
        }
    }
}

/// Periodic forced refresh of every registered key. Stops when `token` is
/// cancelled; a refresh that is mid-flight is abandoned by the orchestrator.
pub fn spawn_refresh_scheduler(
    cache: CacheOrchestrator,
    cfg: SchedulerCfg,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = cfg.interval.max(Duration::from_secs(1));
        tracing::info!(target: "scheduler", interval_secs = period.as_secs(), "refresh scheduler started");

        if cfg.warm_on_start {
            tokio::select! {
                _ = token.cancelled() => return,
                outcomes = cache.warm() => log_tick("warm", &outcomes),
            }
        }

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let outcomes = tokio::select! {
                _ = token.cancelled() => break,
                o = cache.refresh_all() => o,
            };
            log_tick("tick", &outcomes);
        }
        tracing::info!(target: "scheduler", "refresh scheduler stopped");
    })
}

fn log_tick(phase: &'static str, outcomes: &[(String, RefreshOutcome)]) {
    let committed = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, RefreshOutcome::Committed { .. }))
        .count();
    counter!("scheduler_runs_total", "phase" => phase).increment(1);
    gauge!("scheduler_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
    tracing::info!(
        target: "scheduler",
        phase,
        keys = outcomes.len(),
        committed,
        "scheduled refresh pass"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::error::IngestError;
    use crate::ingest::providers::tracks::{Track, TrackEntry};
    use crate::ingest::types::{
        Credentials, FilterSpec, Page, RawRecord, SourceClient, SourceConfig, SourceKind,
    };
    use crate::ingest::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(AtomicUsize);

    #[async_trait::async_trait]
    impl SourceClient for Counting {
        async fn fetch_page(&self, _offset: usize, _limit: usize) -> Result<Page, IngestError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(Page {
                records: vec![RawRecord::Track(TrackEntry {
                    track: Some(Track { id: n + 1, ..Default::default() }),
                    ..Default::default()
                })],
                skipped: 0,
            })
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn setup() -> (CacheOrchestrator, Arc<Counting>, Arc<MemoryStore>) {
        let client = Arc::new(Counting(AtomicUsize::new(0)));
        let cfg = SourceConfig {
            key: "news".into(),
            name: "Counting".into(),
            kind: SourceKind::Rss { feeds: vec![] },
            credentials: Credentials::new(),
            page_size: 10,
            target_count: 0,
            max_pages: 1,
            filter: FilterSpec::accept_all(),
        };
        let store = Arc::new(MemoryStore::new());
        let orch = CacheOrchestrator::builder(store.clone())
            .source(Source::new(cfg, client.clone()))
            .build();
        (orch, client, store)
    }

    #[tokio::test(start_paused = true)]
    async fn warms_then_refreshes_every_interval() {
        let (orch, client, store) = setup();
        let token = CancellationToken::new();
        let cfg = SchedulerCfg {
            interval: Duration::from_secs(3600),
            warm_on_start: true,
        };
        let handle = spawn_refresh_scheduler(orch, cfg, token.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.0.load(Ordering::SeqCst), 1, "warm pass");
        assert!(store.get("news").await.is_some());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(client.0.load(Ordering::SeqCst), 2, "first tick");

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(client.0.load(Ordering::SeqCst), 3, "second tick");

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_tick_does_nothing_more() {
        let (orch, client, _) = setup();
        let token = CancellationToken::new();
        let cfg = SchedulerCfg {
            interval: Duration::from_secs(60),
            warm_on_start: false,
        };
        let handle = spawn_refresh_scheduler(orch, cfg, token.clone());
        token.cancel();
        handle.await.unwrap();
        assert_eq!(client.0.load(Ordering::SeqCst), 0);
    }
}
