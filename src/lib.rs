// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod error;
pub mod ingest;
pub mod metrics;

pub use crate::api::router;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cache::orchestrator::CacheOrchestrator;
use crate::ingest::config::AppConfig;
use crate::ingest::providers::build_http_client;
use crate::ingest::Source;

/// Wire the configured sources, store and policies into one orchestrator.
/// Every refresh it runs stops when `token` is cancelled.
pub fn build_orchestrator(
    cfg: &AppConfig,
    token: CancellationToken,
) -> anyhow::Result<CacheOrchestrator> {
    let http = build_http_client(cfg.http_timeout).context("build HTTP client")?;
    let sources = cfg
        .sources()
        .into_iter()
        .map(|sc| Source::from_config(sc, http.clone()));

    Ok(CacheOrchestrator::builder(cfg.backend.open())
        .sources(sources)
        .ttl(cfg.ttl)
        .stale_policy(cfg.stale_policy)
        .shutdown(token)
        .build())
}

/// `RUST_LOG` filter (default `feed_aggregator=info,warn`); JSON lines when
/// `LOG_FORMAT=json`. Leaves an already installed subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feed_aggregator=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
