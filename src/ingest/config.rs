// src/ingest/config.rs
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::orchestrator::StalePolicy;
use crate::cache::CacheBackend;
use crate::error::ConfigError;
use crate::ingest::providers::tracks::AUTH_CREDENTIAL;
use crate::ingest::types::{Credentials, FeedConfig, FilterSpec, SourceConfig, SourceKind};

pub const ENV_FEEDS_PATH: &str = "FEEDS_CONFIG_PATH";
const DEFAULT_FEEDS_JSON: &str = "news-feeds.json";
const DEFAULT_FEEDS_TOML: &str = "config/news-feeds.toml";

pub const KEY_NEWS: &str = "news";
pub const KEY_TRACKS_STREAM: &str = "tracks-stream";
pub const KEY_TRACKS_FAVORITES: &str = "tracks-favorites";

const TRACKS_API: &str = "https://api-v2.soundcloud.com";
const DEFAULT_FAVORITES_USER: &str = "141564746";
/// Stream entries at or below this length (ms) are clips, not mixes.
const STREAM_MIN_DURATION_MS: u64 = 1_750_000;

pub fn default_feeds() -> Vec<FeedConfig> {
    [
        ("Hacker News", "https://news.ycombinator.com/rss"),
        ("The Verge", "https://www.theverge.com/rss/index.xml"),
        ("TechCrunch", "https://techcrunch.com/feed/"),
    ]
    .into_iter()
    .map(|(name, url)| FeedConfig {
        name: name.to_string(),
        url: url.to_string(),
    })
    .collect()
}

/// Load a feed list from an explicit path. Supports JSON (`[{name, url}]`)
/// or TOML (`feeds = [{ name, url }]`).
pub fn load_feeds_from(path: &Path) -> Result<Vec<FeedConfig>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_feeds(&content, ext.as_str()).map_err(|reason| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Resolve the feed override:
/// 1) $FEEDS_CONFIG_PATH
/// 2) news-feeds.json
/// 3) config/news-feeds.toml
///
/// `Ok(None)` means no override exists.
pub fn load_feeds_override() -> Result<Option<Vec<FeedConfig>>, ConfigError> {
    if let Ok(p) = std::env::var(ENV_FEEDS_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(ConfigError::MissingOverride { path: pb });
        }
        return load_feeds_from(&pb).map(Some);
    }
    for candidate in [DEFAULT_FEEDS_JSON, DEFAULT_FEEDS_TOML] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_feeds_from(&p).map(Some);
        }
    }
    Ok(None)
}

/// Override when present and usable, built-in defaults otherwise.
pub fn resolve_feeds() -> Vec<FeedConfig> {
    match load_feeds_override() {
        Ok(Some(feeds)) if !feeds.is_empty() => {
            tracing::info!(target: "config", count = feeds.len(), "using configured feeds");
            feeds
        }
        Ok(Some(_)) => {
            tracing::warn!(target: "config", "feed override is empty, using defaults");
            default_feeds()
        }
        Ok(None) => {
            tracing::info!(target: "config", "no custom feeds configuration found, using defaults");
            default_feeds()
        }
        Err(e) => {
            tracing::warn!(target: "config", error = %e, "feed override unusable, using defaults");
            default_feeds()
        }
    }
}

fn parse_feeds(s: &str, hint_ext: &str) -> Result<Vec<FeedConfig>, String> {
    if hint_ext == "toml" {
        return parse_toml(s);
    }
    match parse_json(s) {
        Ok(v) => Ok(v),
        Err(json_err) => parse_toml(s).map_err(|_| json_err),
    }
}

fn parse_toml(s: &str) -> Result<Vec<FeedConfig>, String> {
    #[derive(serde::Deserialize)]
    struct TomlFeeds {
        feeds: Vec<FeedConfig>,
    }
    let v: TomlFeeds = toml::from_str(s).map_err(|e| e.to_string())?;
    Ok(clean_list(v.feeds))
}

fn parse_json(s: &str) -> Result<Vec<FeedConfig>, String> {
    let v: Vec<FeedConfig> = serde_json::from_str(s).map_err(|e| e.to_string())?;
    Ok(clean_list(v))
}

/// Trim, drop blanks, drop repeated URLs (first wins).
fn clean_list(items: Vec<FeedConfig>) -> Vec<FeedConfig> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|f| FeedConfig {
            name: f.name.trim().to_string(),
            url: f.url.trim().to_string(),
        })
        .filter(|f| !f.name.is_empty() && !f.url.is_empty())
        .filter(|f| seen.insert(f.url.clone()))
        .collect()
}

/* ----------------------------
Environment
---------------------------- */

/// Upper- or lower-case variant of an env var, blank treated as unset.
fn env_any(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .or_else(|| std::env::var(name.to_ascii_lowercase()).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = match env_any(name) {
        None => default,
        Some(raw) => match raw.parse::<u64>() {
            Ok(v) if v > 0 => v,
            _ => {
                tracing::warn!(target: "config", var = name, value = %raw, "invalid duration, using default");
                default
            }
        },
    };
    Duration::from_secs(secs)
}

fn env_flag(name: &str, default: bool) -> bool {
    match env_any(name).map(|v| v.to_ascii_lowercase()) {
        None => default,
        Some(v) => !matches!(v.as_str(), "0" | "false" | "off" | "no"),
    }
}

/// Upstream credentials. Each missing value is logged, never fatal.
pub fn credentials_from_env() -> Credentials {
    let mut creds = Credentials::new();
    for (var, name) in [
        ("SC_AUTH_TOKEN", AUTH_CREDENTIAL),
        ("SC_CLIENT_ID", "client_id"),
        ("SC_A_ID", "sc_a_id"),
    ] {
        let value = env_any(var);
        if value.is_none() {
            tracing::warn!(target: "config", var, "credential is blank");
        }
        creds = creds.with(name, value);
    }
    creds.with(
        "user_id",
        Some(env_any("SC_USER_ID").unwrap_or_else(|| DEFAULT_FAVORITES_USER.to_string())),
    )
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feeds: Vec<FeedConfig>,
    pub credentials: Credentials,
    pub backend: CacheBackend,
    pub ttl: Duration,
    pub refresh_interval: Duration,
    pub http_timeout: Duration,
    pub stale_policy: StalePolicy,
    pub scheduler_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let backend = match env_any("CACHE_BACKEND").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "memory" => CacheBackend::Memory,
            other => {
                if let Some(v) = other.filter(|v| v != "file") {
                    tracing::warn!(target: "config", value = %v, "unknown CACHE_BACKEND, using file");
                }
                CacheBackend::File(PathBuf::from(
                    env_any("CACHE_DIR").unwrap_or_else(|| "cache".to_string()),
                ))
            }
        };
        let stale_policy = match env_any("STALE_POLICY").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "blocking" => StalePolicy::Blocking,
            _ => StalePolicy::Background,
        };

        Self {
            feeds: resolve_feeds(),
            credentials: credentials_from_env(),
            backend,
            ttl: env_secs("CACHE_TTL_SECS", 3600),
            refresh_interval: env_secs("REFRESH_INTERVAL_SECS", 3600),
            http_timeout: env_secs("HTTP_TIMEOUT_SECS", 10),
            stale_policy,
            scheduler_enabled: env_flag("SCHEDULER_ENABLED", true),
        }
    }

    /// The three built-in content keys.
    pub fn sources(&self) -> Vec<SourceConfig> {
        sources_for(&self.feeds, &self.credentials, TRACKS_API)
    }
}

/// Source table for the given feeds, credentials and track API base.
pub fn sources_for(
    feeds: &[FeedConfig],
    credentials: &Credentials,
    tracks_api: &str,
) -> Vec<SourceConfig> {
    let paging = |extra: &[(&str, &str)]| -> Vec<(String, String)> {
        [("offset", "{offset}"), ("limit", "{limit}")]
            .iter()
            .chain(extra.iter())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };

    vec![
        SourceConfig {
            key: KEY_NEWS.to_string(),
            name: "News".to_string(),
            kind: SourceKind::Rss {
                feeds: feeds.to_vec(),
            },
            credentials: Credentials::new(),
            page_size: 100,
            target_count: 0,
            max_pages: 1,
            filter: FilterSpec::accept_all(),
        },
        SourceConfig {
            key: KEY_TRACKS_STREAM.to_string(),
            name: "SoundCloud Stream".to_string(),
            kind: SourceKind::Tracks {
                endpoint: format!("{tracks_api}/stream"),
                query: paging(&[
                    ("sc_a_id", "{sc_a_id}"),
                    ("promoted_playlist", "true"),
                    ("client_id", "{client_id}"),
                    ("app_locale", "en"),
                ]),
            },
            credentials: credentials.clone(),
            page_size: 100,
            target_count: 100,
            max_pages: 20,
            filter: FilterSpec {
                min_duration_ms: Some(STREAM_MIN_DURATION_MS),
                exclude_content_types: vec!["playlist".to_string()],
            },
        },
        SourceConfig {
            key: KEY_TRACKS_FAVORITES.to_string(),
            name: "SoundCloud Favorites".to_string(),
            kind: SourceKind::Tracks {
                endpoint: format!("{tracks_api}/users/{{user_id}}/track_likes"),
                query: paging(&[("client_id", "{client_id}"), ("app_locale", "en")]),
            },
            credentials: credentials.clone(),
            page_size: 100,
            target_count: 100,
            max_pages: 20,
            filter: FilterSpec::accept_all(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn json_and_toml_are_cleaned() {
        let json = r#"[
            {"name":" HN ","url":"https://hn/rss"},
            {"name":"","url":"x"},
            {"name":"Dup","url":"https://hn/rss"}
        ]"#;
        let out = parse_feeds(json, "json").unwrap();
        assert_eq!(
            out,
            vec![FeedConfig {
                name: "HN".into(),
                url: "https://hn/rss".into()
            }]
        );

        let toml = r#"
feeds = [
  { name = "Verge", url = "https://verge/rss" },
  { name = "Lobsters", url = "https://lobste.rs/rss" },
]
"#;
        let out = parse_feeds(toml, "toml").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].name, "Lobsters");
    }

    #[test]
    fn malformed_document_is_error() {
        assert!(parse_feeds("{not json", "json").is_err());
        assert!(parse_feeds(r#"[{"name": 1}]"#, "").is_err());
    }

    #[test]
    fn source_table_matches_keys() {
        let creds = Credentials::new().with("user_id", Some("42".into()));
        let sources = sources_for(&default_feeds(), &creds, "http://api");
        let keys: Vec<_> = sources.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec![KEY_NEWS, KEY_TRACKS_STREAM, KEY_TRACKS_FAVORITES]);
        assert!(!sources[0].is_paginated());
        assert_eq!(sources[1].filter.min_duration_ms, Some(1_750_000));
        match &sources[2].kind {
            SourceKind::Tracks { endpoint, .. } => {
                assert_eq!(endpoint, "http://api/users/{user_id}/track_likes")
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[serial_test::serial]
    #[test]
    fn override_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_FEEDS_PATH);

        // Nothing on disk -> no override, defaults win.
        assert!(load_feeds_override().unwrap().is_none());
        assert_eq!(resolve_feeds(), default_feeds());

        // Malformed default file -> defaults.
        fs::write(tmp.path().join(DEFAULT_FEEDS_JSON), "[{").unwrap();
        assert!(load_feeds_override().is_err());
        assert_eq!(resolve_feeds(), default_feeds());

        // Env wins over the default file.
        let p = tmp.path().join("mine.json");
        fs::write(&p, r#"[{"name":"X","url":"https://x/rss"}]"#).unwrap();
        env::set_var(ENV_FEEDS_PATH, p.display().to_string());
        assert_eq!(resolve_feeds()[0].name, "X");

        env::set_var(ENV_FEEDS_PATH, tmp.path().join("missing.json").display().to_string());
        assert!(matches!(
            load_feeds_override(),
            Err(ConfigError::MissingOverride { .. })
        ));
        env::remove_var(ENV_FEEDS_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
