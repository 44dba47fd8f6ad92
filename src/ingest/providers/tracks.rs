// src/ingest/providers/tracks.rs
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;

use crate::error::IngestError;
use crate::ingest::types::{Credentials, Page, RawRecord, SourceClient};

/// Credential carried verbatim in the `Authorization` header.
pub const AUTH_CREDENTIAL: &str = "authorization";

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
pub struct TrackPage {
    #[serde(default)]
    pub collection: Vec<TrackEntry>,
    #[serde(default)]
    pub next_href: Option<String>,
}

/// One entry of a stream or likes listing. Stream entries carry either a
/// `track` or a `playlist`; likes carry a `track`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackEntry {
    pub created_at: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub uuid: Option<String>,
    pub track: Option<Track>,
    pub playlist: Option<Playlist>,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub id: u64,
    pub title: Option<String>,
    pub permalink_url: Option<String>,
    pub artwork_url: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<String>,
    /// Milliseconds.
    pub duration: Option<u64>,
    pub genre: Option<String>,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub id: u64,
    pub title: Option<String>,
    pub permalink_url: Option<String>,
    pub artwork_url: Option<String>,
    pub created_at: Option<String>,
    pub duration: Option<u64>,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    #[serde(default)]
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Decode one listing page.
pub fn parse_page(body: &[u8], url: &str) -> Result<TrackPage, IngestError> {
    serde_json::from_slice(body).map_err(|e| IngestError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Replace `{name}` placeholders. Unknown names render empty.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    static RE_VAR: OnceCell<Regex> = OnceCell::new();
    let re = RE_VAR.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        vars.iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
            .unwrap_or_default()
    })
    .into_owned()
}

/// Paginated track-listing client (`offset` / `limit` pagination).
pub struct TrackClient {
    name: String,
    endpoint: String,
    query: Vec<(String, String)>,
    credentials: Credentials,
    http: reqwest::Client,
}

impl TrackClient {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        query: Vec<(String, String)>,
        credentials: Credentials,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            query,
            credentials,
            http,
        }
    }

    pub fn page_url(&self, offset: usize, limit: usize) -> Result<reqwest::Url, IngestError> {
        let offset = offset.to_string();
        let limit = limit.to_string();
        let mut vars: Vec<(&str, &str)> = vec![("offset", &offset), ("limit", &limit)];
        vars.extend(self.credentials.iter());

        let rendered = render_template(&self.endpoint, &vars);
        let mut url = reqwest::Url::parse(&rendered).map_err(|e| IngestError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, &render_template(v, &vars));
            }
        }
        Ok(url)
    }

    fn request(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, ORIGIN, REFERER, USER_AGENT};

        let mut req = self
            .http
            .get(url)
            .header(ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(ORIGIN, "https://soundcloud.com")
            .header(REFERER, "https://soundcloud.com/")
            .header(USER_AGENT, BROWSER_UA);
        if let Some(token) = self.credentials.get(AUTH_CREDENTIAL) {
            req = req.header(AUTHORIZATION, token);
        }
        req
    }
}

#[async_trait]
impl SourceClient for TrackClient {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page, IngestError> {
        let url = self.page_url(offset, limit)?;
        let url_str = url.to_string();
        tracing::debug!(target: "ingest", source = %self.name, offset, limit, "fetching track page");

        let resp = self
            .request(url)
            .send()
            .await
            .map_err(|e| IngestError::Transport {
                url: url_str.clone(),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Err(IngestError::Status {
                url: url_str,
                status: resp.status().as_u16(),
            });
        }

        // reqwest already undid any `Content-Encoding: gzip`.
        let body = resp.bytes().await.map_err(|e| IngestError::Transport {
            url: url_str.clone(),
            source: e,
        })?;
        let page = parse_page(&body, &url_str)?;

        tracing::info!(target: "ingest", source = %self.name, offset, count = page.collection.len(), "fetched track page");
        Ok(Page {
            records: page.collection.into_iter().map(RawRecord::Track).collect(),
            skipped: 0,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str, query: &[(&str, &str)], creds: Credentials) -> TrackClient {
        TrackClient::new(
            "tracks",
            endpoint,
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            creds,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn template_replaces_known_and_blanks_unknown() {
        let out = render_template("/users/{user_id}/likes?x={nope}", &[("user_id", "42")]);
        assert_eq!(out, "/users/42/likes?x=");
    }

    #[test]
    fn page_url_renders_path_and_encodes_query() {
        let creds = Credentials::new()
            .with("user_id", Some("141564746".into()))
            .with("client_id", Some("a b&c".into()));
        let c = client(
            "https://api.example.com/users/{user_id}/track_likes",
            &[("offset", "{offset}"), ("limit", "{limit}"), ("client_id", "{client_id}")],
            creds,
        );
        let url = c.page_url(200, 100).unwrap();
        assert_eq!(url.path(), "/users/141564746/track_likes");
        assert_eq!(url.query(), Some("offset=200&limit=100&client_id=a+b%26c"));
    }

    #[test]
    fn unparseable_endpoint_is_reported() {
        let c = client("not a url {offset}", &[], Credentials::new());
        let err = c.page_url(0, 10).unwrap_err();
        assert!(matches!(err, IngestError::InvalidEndpoint { .. }));
    }

    #[test]
    fn parses_stream_page_with_nulls() {
        let body = br#"{
          "collection": [
            {"created_at": "2024-05-01T10:00:00Z", "type": "track", "uuid": "u1",
             "track": {"id": 7, "title": "Mix", "duration": 3900000, "artwork_url": null,
                       "created_at": "2024-04-30T10:00:00Z", "user": {"username": "dj"}}},
            {"created_at": "2024-05-01T09:00:00Z", "type": "playlist", "uuid": "u2",
             "playlist": {"id": 9, "title": "Set list"}}
          ],
          "next_href": null
        }"#;
        let page = parse_page(body, "u").unwrap();
        assert_eq!(page.collection.len(), 2);
        let t = page.collection[0].track.as_ref().unwrap();
        assert_eq!(t.id, 7);
        assert_eq!(t.duration, Some(3_900_000));
        assert!(page.collection[1].track.is_none());
        assert_eq!(page.collection[1].playlist.as_ref().unwrap().id, 9);
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let err = parse_page(b"{\"collection\": [", "u").unwrap_err();
        assert!(err.is_decode());
    }
}
