// src/ingest/providers/mod.rs
pub mod rss;
pub mod tracks;

use std::time::Duration;

const USER_AGENT: &str = "feed-aggregator/0.1 (+https://jbhicks.dev)";

/// Shared upstream HTTP client. Every call carries a connect timeout and an
/// overall deadline so a slow upstream cannot stall a refresh.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout.min(Duration::from_secs(4)))
        .timeout(timeout)
        .build()
}
