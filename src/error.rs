// src/error.rs
//! Error taxonomy for the ingestion and cache subsystem.
//!
//! Nothing here is fatal: ingest errors are logged and turn into "serve what we
//! have", config errors fall back to built-in defaults, cache errors leave the
//! previous snapshot in place.

use std::path::PathBuf;

/// Failure while talking to, or decoding from, one upstream source.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("cannot decode payload from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("all {attempted} feeds failed")]
    AllFeedsFailed { attempted: usize },
}

impl IngestError {
    /// Network-level failures (unreachable, timeout, non-2xx). Retried on the
    /// next refresh, never surfaced to readers.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IngestError::Transport { .. } | IngestError::Status { .. }
        )
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, IngestError::Decode { .. })
    }
}

/// Malformed or unreadable configuration input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {}", .path.display(), .reason)]
    Parse { path: PathBuf, reason: String },

    #[error("override points to non-existent path {}", .path.display())]
    MissingOverride { path: PathBuf },
}

/// Failure while persisting a cache snapshot.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}
