// src/ingest/providers/rss.rs
use async_trait::async_trait;
use metrics::counter;
use quick_xml::de::from_str;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::IngestError;
use crate::ingest::types::{FeedConfig, Page, RawRecord, SourceClient};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

/// One `<item>` of an RSS 2.0 channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RssItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<String>,
    pub enclosure: Option<Enclosure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Enclosure {
    #[serde(rename = "@url")]
    pub url: Option<String>,
    #[serde(rename = "@type")]
    pub mime: Option<String>,
}

impl Enclosure {
    /// URL of the enclosure when it is an image.
    pub fn image_url(&self) -> Option<&str> {
        let is_image = self
            .mime
            .as_deref()
            .is_some_and(|m| m.to_ascii_lowercase().starts_with("image/"));
        if is_image {
            self.url.as_deref().filter(|u| !u.trim().is_empty())
        } else {
            None
        }
    }
}

/// Decode an RSS 2.0 document into its items.
pub fn parse_feed(xml: &str, url: &str) -> Result<Vec<RssItem>, IngestError> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).map_err(|e| IngestError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(rss.channel.item)
}

/// Fetches every configured feed in one pass. A failing feed is skipped;
/// the pass only fails when no feed succeeds.
pub struct RssClient {
    name: String,
    feeds: Vec<FeedConfig>,
    http: reqwest::Client,
}

impl RssClient {
    pub fn new(name: impl Into<String>, feeds: Vec<FeedConfig>, http: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            feeds,
            http,
        }
    }

    pub fn feeds(&self) -> &[FeedConfig] {
        &self.feeds
    }

    pub async fn fetch_feed(&self, feed: &FeedConfig) -> Result<Vec<RssItem>, IngestError> {
        tracing::debug!(target: "ingest", feed = %feed.name, url = %feed.url, "fetching feed");

        let resp = self
            .http
            .get(&feed.url)
            .header(reqwest::header::ACCEPT, "application/rss+xml, application/xml, text/xml")
            .send()
            .await
            .map_err(|e| IngestError::Transport {
                url: feed.url.clone(),
                source: e,
            })?;

        if resp.status() != StatusCode::OK {
            return Err(IngestError::Status {
                url: feed.url.clone(),
                status: resp.status().as_u16(),
            });
        }

        let body = resp.text().await.map_err(|e| IngestError::Transport {
            url: feed.url.clone(),
            source: e,
        })?;
        parse_feed(&body, &feed.url)
    }
}

#[async_trait]
impl SourceClient for RssClient {
    async fn fetch_page(&self, offset: usize, _limit: usize) -> Result<Page, IngestError> {
        // Feeds are not paginated: everything arrives with the first page.
        if offset > 0 {
            return Ok(Page::default());
        }

        let mut page = Page::default();
        for feed in &self.feeds {
            match self.fetch_feed(feed).await {
                Ok(items) => {
                    tracing::info!(target: "ingest", feed = %feed.name, count = items.len(), "fetched feed");
                    page.records.extend(items.into_iter().map(|item| RawRecord::Rss {
                        feed: feed.name.clone(),
                        item,
                    }));
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", feed = %feed.name, error = %e, "skipped feed");
                    counter!("ingest_feed_errors_total", "feed" => feed.name.clone()).increment(1);
                    page.skipped += 1;
                }
            }
        }

        if !self.feeds.is_empty() && page.skipped == self.feeds.len() {
            return Err(IngestError::AllFeedsFailed {
                attempted: self.feeds.len(),
            });
        }
        Ok(page)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// quick-xml only knows the five XML entities; feeds happily ship HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example</title>
  <item>
    <title>First&nbsp;post</title>
    <link>https://example.com/1</link>
    <description><![CDATA[<p><img src="//cdn.example.com/a.png"> hello</p>]]></description>
    <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate>
  </item>
  <item>
    <title>Second</title>
    <link>https://example.com/2</link>
    <enclosure url="https://cdn.example.com/b.jpg" length="10" type="image/jpeg"/>
  </item>
</channel></rss>"#;

    #[test]
    fn parses_items_and_scrubs_entities() {
        let items = parse_feed(XML, "https://example.com/rss").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("First post"));
        assert!(items[0].description.as_deref().unwrap().contains("<img"));
        assert_eq!(
            items[0].pub_date.as_deref(),
            Some("Mon, 02 Jan 2006 15:04:05 -0700")
        );
        assert_eq!(
            items[1].enclosure.as_ref().and_then(Enclosure::image_url),
            Some("https://cdn.example.com/b.jpg")
        );
    }

    #[test]
    fn empty_channel_is_ok() {
        let items = parse_feed("<rss><channel><title>x</title></channel></rss>", "u").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn malformed_xml_is_decode_error() {
        let err = parse_feed("<rss><channel><item>", "u").unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn later_offsets_are_empty() {
        let client = RssClient::new("news", vec![], reqwest::Client::new());
        let page = client.fetch_page(100, 100).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.skipped, 0);
    }
}
