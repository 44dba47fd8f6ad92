//! Feed aggregator: binary entrypoint.
//! Boots the Axum HTTP server, the cache orchestrator and the hourly refresh.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;

use feed_aggregator::api::AppState;
use feed_aggregator::ingest::config::AppConfig;
use feed_aggregator::ingest::scheduler::{spawn_refresh_scheduler, SchedulerCfg};
use feed_aggregator::metrics::Metrics;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    feed_aggregator::init_tracing();

    let cfg = AppConfig::from_env();
    tracing::info!(
        feeds = cfg.feeds.len(),
        backend = ?cfg.backend,
        ttl_secs = cfg.ttl.as_secs(),
        policy = ?cfg.stale_policy,
        "starting feed aggregator"
    );

    let metrics = Metrics::init(cfg.ttl)?;

    let token = CancellationToken::new();
    let cache = feed_aggregator::build_orchestrator(&cfg, token.clone())
        .context("build cache orchestrator")?;

    if cfg.scheduler_enabled {
        let sched = SchedulerCfg {
            interval: cfg.refresh_interval,
            warm_on_start: true,
        };
        spawn_refresh_scheduler(cache.clone(), sched, token.clone());
    } else {
        tracing::info!("refresh scheduler disabled");
    }

    let state = AppState::new(cache).with_shutdown_guard(token.drop_guard());
    let router = feed_aggregator::router(state).merge(metrics.router());

    Ok(router.into())
}
