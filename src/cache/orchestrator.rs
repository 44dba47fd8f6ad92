// src/cache/orchestrator.rs
//! Cache Orchestrator: get-or-refresh control flow over the [`CacheStore`].
//!
//! Per key: Missing → Fresh → Stale → (refresh) → Fresh.
//! - Missing: the read refreshes inline before answering.
//! - Stale: `now - last_updated >= ttl`; the read either answers with the stale
//!   snapshot and refreshes in the background, or refreshes inline (policy).
//! - At most one refresh per key runs at a time. A caller that waited on an
//!   in-flight refresh reuses its result instead of fetching again.
//! - A refresh that yields nothing never replaces the previous snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheEntry, CacheStore};
use crate::ingest::Source;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cache_reads_total", "Reads by key and observed state.");
        describe_counter!("cache_refresh_total", "Refreshes by key and outcome.");
        describe_gauge!("cache_items", "Items in the current snapshot.");
        describe_gauge!("cache_last_refresh_ts", "Unix ts of the last committed refresh.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Missing,
    Fresh,
    Stale,
}

impl Freshness {
    /// Exactly `ttl` old already counts as stale.
    pub fn classify(entry: Option<&CacheEntry>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let Some(entry) = entry else {
            return Freshness::Missing;
        };
        let age = now.signed_duration_since(entry.last_updated);
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        if age >= ttl {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Missing => "missing",
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
        }
    }
}

/// What a read does when it finds a stale snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Answer with the stale snapshot, refresh in the background.
    #[default]
    Background,
    /// Refresh inline, then answer.
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Committed { items: usize },
    /// Another refresh finished while this one waited for the key.
    Coalesced,
    /// Nothing usable was fetched; the previous snapshot (if any) stays.
    Preserved { reason: String },
    Cancelled,
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Committed { .. } => "committed",
            RefreshOutcome::Coalesced => "coalesced",
            RefreshOutcome::Preserved { .. } => "preserved",
            RefreshOutcome::Cancelled => "cancelled",
        }
    }
}

/// Result of a read: the snapshot to serve (if any) and the state observed
/// before any refresh happened.
#[derive(Debug, Clone)]
pub struct Read {
    pub entry: Option<Arc<CacheEntry>>,
    pub freshness: Freshness,
}

struct Slot {
    source: Arc<Source>,
    lock: Arc<Mutex<()>>,
}

struct Inner {
    store: Arc<dyn CacheStore>,
    slots: BTreeMap<String, Slot>,
    ttl: Duration,
    stale_policy: StalePolicy,
    shutdown: CancellationToken,
}

/// Cheap to clone; all clones share the same store, sources and locks.
#[derive(Clone)]
pub struct CacheOrchestrator {
    inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    store: Arc<dyn CacheStore>,
    sources: Vec<Source>,
    ttl: Duration,
    stale_policy: StalePolicy,
    shutdown: CancellationToken,
}

impl OrchestratorBuilder {
    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources<I: IntoIterator<Item = Source>>(mut self, sources: I) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(self) -> CacheOrchestrator {
        ensure_metrics_described();
        let slots = self
            .sources
            .into_iter()
            .map(|s| {
                (
                    s.key().to_string(),
                    Slot {
                        source: Arc::new(s),
                        lock: Arc::new(Mutex::new(())),
                    },
                )
            })
            .collect();
        CacheOrchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                slots,
                ttl: self.ttl,
                stale_policy: self.stale_policy,
                shutdown: self.shutdown,
            }),
        }
    }
}

impl CacheOrchestrator {
    pub fn builder(store: Arc<dyn CacheStore>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            sources: Vec::new(),
            ttl: Duration::from_secs(3600),
            stale_policy: StalePolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.slots.keys().map(String::as_str)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.inner.slots.contains_key(key)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// `true` while a refresh for `key` holds the key lock.
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inner
            .slots
            .get(key)
            .is_some_and(|s| s.lock.try_lock().is_err())
    }

    pub async fn freshness(&self, key: &str) -> Freshness {
        let entry = self.inner.store.get(key).await;
        Freshness::classify(entry.as_deref(), Utc::now(), self.inner.ttl)
    }

    /// Serve `key`, refreshing first when Missing (and when Stale under the
    /// blocking policy). `None` for keys no source is registered for.
    pub async fn read(&self, key: &str) -> Option<Read> {
        if !self.has_key(key) {
            return None;
        }
        let store = &self.inner.store;
        let existing = store.get(key).await;
        let freshness = Freshness::classify(existing.as_deref(), Utc::now(), self.inner.ttl);
        counter!("cache_reads_total", "key" => key.to_string(), "state" => freshness.as_str())
            .increment(1);

        let entry = match freshness {
            Freshness::Fresh => existing,
            Freshness::Missing => {
                tracing::info!(target: "cache", key, "cache miss, refreshing inline");
                self.refresh(key).await;
                store.get(key).await
            }
            Freshness::Stale => match self.inner.stale_policy {
                StalePolicy::Background => {
                    self.spawn_refresh(key);
                    existing
                }
                StalePolicy::Blocking => {
                    tracing::info!(target: "cache", key, "stale snapshot, refreshing inline");
                    self.refresh(key).await;
                    store.get(key).await.or(existing)
                }
            },
        };
        Some(Read { entry, freshness })
    }

    /// Refresh `key` now, waiting for any in-flight refresh of the same key.
    pub async fn refresh(&self, key: &str) -> RefreshOutcome {
        let requested_at = Utc::now();
        let Some(slot) = self.inner.slots.get(key) else {
            return RefreshOutcome::Preserved {
                reason: format!("no source registered for {key}"),
            };
        };
        let guard = tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                return self.finish(key, RefreshOutcome::Cancelled);
            }
            g = slot.lock.clone().lock_owned() => g,
        };
        self.refresh_locked(key, requested_at, guard).await
    }

    /// Start a background refresh unless one is already running for `key`.
    /// Returns whether a task was spawned.
    pub fn spawn_refresh(&self, key: &str) -> bool {
        let Some(slot) = self.inner.slots.get(key) else {
            return false;
        };
        let Ok(guard) = slot.lock.clone().try_lock_owned() else {
            tracing::debug!(target: "cache", key, "refresh already in flight");
            return false;
        };
        let this = self.clone();
        let key = key.to_string();
        let requested_at = Utc::now();
        tokio::spawn(async move {
            this.refresh_locked(&key, requested_at, guard).await;
        });
        true
    }

    /// Forced refresh of every key, one after another.
    pub async fn refresh_all(&self) -> Vec<(String, RefreshOutcome)> {
        let mut out = Vec::with_capacity(self.inner.slots.len());
        for key in self.inner.slots.keys() {
            if self.inner.shutdown.is_cancelled() {
                break;
            }
            out.push((key.clone(), self.refresh(key).await));
        }
        out
    }

    /// Refresh only the keys that are Missing or Stale.
    pub async fn warm(&self) -> Vec<(String, RefreshOutcome)> {
        let mut out = Vec::new();
        for key in self.inner.slots.keys() {
            if self.inner.shutdown.is_cancelled() {
                break;
            }
            if self.freshness(key).await != Freshness::Fresh {
                out.push((key.clone(), self.refresh(key).await));
            }
        }
        out
    }

    async fn refresh_locked(
        &self,
        key: &str,
        requested_at: DateTime<Utc>,
        _guard: OwnedMutexGuard<()>,
    ) -> RefreshOutcome {
        let Some(slot) = self.inner.slots.get(key) else {
            return RefreshOutcome::Preserved {
                reason: format!("no source registered for {key}"),
            };
        };
        let store = &self.inner.store;

        if let Some(current) = store.get(key).await {
            if current.last_updated >= requested_at {
                return self.finish(key, RefreshOutcome::Coalesced);
            }
        }

        let started = Utc::now();
        let harvest = tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                tracing::warn!(target: "cache", key, "refresh abandoned on shutdown");
                return self.finish(key, RefreshOutcome::Cancelled);
            }
            res = slot.source.collect(started) => res,
        };

        let outcome = match harvest {
            Err(e) => {
                tracing::warn!(target: "cache", key, error = %e, "refresh failed, keeping previous snapshot");
                RefreshOutcome::Preserved {
                    reason: e.to_string(),
                }
            }
            Ok(h) if h.items.is_empty() => {
                tracing::warn!(target: "cache", key, pages = h.pages, "refresh produced no items, keeping previous snapshot");
                RefreshOutcome::Preserved {
                    reason: "no usable records".to_string(),
                }
            }
            Ok(h) => {
                let count = h.items.len();
                let committed_at = Utc::now();
                match store.put(key, CacheEntry::new(key, h.items, committed_at)).await {
                    Ok(()) => {
                        gauge!("cache_items", "key" => key.to_string()).set(count as f64);
                        gauge!("cache_last_refresh_ts", "key" => key.to_string())
                            .set(committed_at.timestamp() as f64);
                        RefreshOutcome::Committed { items: count }
                    }
                    Err(e) => {
                        tracing::warn!(target: "cache", key, error = %e, "snapshot write failed");
                        RefreshOutcome::Preserved {
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };
        self.finish(key, outcome)
    }

    fn finish(&self, key: &str, outcome: RefreshOutcome) -> RefreshOutcome {
        counter!("cache_refresh_total", "key" => key.to_string(), "outcome" => outcome.label())
            .increment(1);
        tracing::info!(target: "cache", key, outcome = ?outcome, "refresh done");
        outcome
    }
}
