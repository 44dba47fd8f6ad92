// src/ingest/normalize.rs
//! Normalizer: maps raw upstream records onto [`Item`].
//!
//! Derived display fields are computed here once, at refresh time:
//! - `published_at` from an ordered list of timestamp formats (fetch time when none match),
//! - `elapsed_label` / `duration_label` with truncating integer arithmetic,
//! - `thumbnail_url` from the first `<img src>` of the description markup or a provider field.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::ingest::providers::rss::{Enclosure, RssItem};
use crate::ingest::providers::tracks::TrackEntry;
use crate::ingest::types::{Item, RawRecord};

const DESCRIPTION_CAP: usize = 500;

/// Context shared by every record of one refresh.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeCtx<'a> {
    pub source_name: &'a str,
    pub now: DateTime<Utc>,
}

pub fn normalize(raw: RawRecord, ctx: &NormalizeCtx<'_>) -> Item {
    match raw {
        RawRecord::Rss { feed, item } => normalize_rss(&feed, item, ctx),
        RawRecord::Track(entry) => normalize_track(entry, ctx),
    }
}

fn normalize_rss(feed: &str, item: RssItem, ctx: &NormalizeCtx<'_>) -> Item {
    let markup = item.description.unwrap_or_default();
    let mut thumbnail_url = extract_thumbnail(&markup);
    if thumbnail_url.is_empty() {
        if let Some(u) = item.enclosure.as_ref().and_then(Enclosure::image_url) {
            thumbnail_url = absolutize(u.trim());
        }
    }

    let title = normalize_text(item.title.as_deref().unwrap_or_default());
    let link = item.link.unwrap_or_default().trim().to_string();
    let published_at = parse_published(item.pub_date.as_deref(), ctx.now);

    Item {
        id: rss_identity(&link, &title),
        title,
        link,
        description: normalize_text(&markup),
        source_name: if feed.is_empty() { ctx.source_name } else { feed }.to_string(),
        published_at,
        duration_seconds: None,
        duration_ms: None,
        elapsed_label: elapsed_label(published_at, ctx.now),
        duration_label: String::new(),
        thumbnail_url,
        content_type: "article".to_string(),
        author: None,
    }
}

fn normalize_track(entry: TrackEntry, ctx: &NormalizeCtx<'_>) -> Item {
    let entry_user = entry.user.map(|u| u.username);

    let (id, title, link, description, created, duration_ms, artwork, author, default_kind) =
        if let Some(t) = entry.track {
            (
                format!("track:{}", t.id),
                t.title,
                t.permalink_url,
                t.description,
                t.created_at.or(entry.created_at),
                t.duration,
                t.artwork_url
                    .or_else(|| t.user.as_ref().and_then(|u| u.avatar_url.clone())),
                t.user.map(|u| u.username).or(entry_user),
                "track",
            )
        } else if let Some(p) = entry.playlist {
            (
                format!("playlist:{}", p.id),
                p.title,
                p.permalink_url,
                None,
                p.created_at.or(entry.created_at),
                p.duration,
                p.artwork_url,
                p.user.map(|u| u.username).or(entry_user),
                "playlist",
            )
        } else {
            let key = entry
                .uuid
                .clone()
                .or_else(|| entry.created_at.clone())
                .unwrap_or_default();
            (
                format!("entry:{key}"),
                None,
                None,
                None,
                entry.created_at,
                None,
                None,
                entry_user,
                "unknown",
            )
        };

    let published_at = parse_published(created.as_deref(), ctx.now);

    Item {
        id,
        title: normalize_text(title.as_deref().unwrap_or_default()),
        link: link.unwrap_or_default(),
        description: normalize_text(description.as_deref().unwrap_or_default()),
        source_name: ctx.source_name.to_string(),
        published_at,
        duration_seconds: duration_ms.map(|ms| ms / 1000),
        duration_ms,
        elapsed_label: elapsed_label(published_at, ctx.now),
        duration_label: duration_ms.map(duration_label).unwrap_or_default(),
        thumbnail_url: artwork
            .map(|u| absolutize(u.trim()))
            .unwrap_or_default(),
        content_type: entry
            .kind
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| default_kind.to_string()),
        author: author.filter(|a| !a.is_empty()),
    }
}

/* ----------------------------
Timestamps
---------------------------- */

/// Known upstream timestamp layouts, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    Rfc1123Z,
    /// `Mon, 02 Jan 2006 15:04:05 MST`
    Rfc1123,
    /// `02 Jan 06 15:04 -0700`
    Rfc822Z,
    /// `02 Jan 06 15:04 MST`
    Rfc822,
    /// `2006-01-02T15:04:05Z`
    IsoZulu,
    /// `2006-01-02T15:04:05-07:00`
    IsoOffset,
}

pub const TIMESTAMP_FORMATS: [TimestampFormat; 6] = [
    TimestampFormat::Rfc1123Z,
    TimestampFormat::Rfc1123,
    TimestampFormat::Rfc822Z,
    TimestampFormat::Rfc822,
    TimestampFormat::IsoZulu,
    TimestampFormat::IsoOffset,
];

impl TimestampFormat {
    pub fn parse(self, s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        match self {
            TimestampFormat::Rfc1123Z => {
                DateTime::parse_from_str(strip_weekday(s)?, "%d %b %Y %H:%M:%S %z")
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
            TimestampFormat::Rfc1123 => {
                parse_with_zone_name(strip_weekday(s)?, "%d %b %Y %H:%M:%S")
            }
            TimestampFormat::Rfc822Z => DateTime::parse_from_str(s, "%d %b %y %H:%M %z")
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            TimestampFormat::Rfc822 => parse_with_zone_name(s, "%d %b %y %H:%M"),
            TimestampFormat::IsoZulu => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .ok()
                .map(|n| n.and_utc()),
            TimestampFormat::IsoOffset => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
        }
    }
}

/// First format that parses wins.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    TIMESTAMP_FORMATS.iter().find_map(|f| f.parse(s))
}

/// Like [`parse_timestamp`] but never fails: unknown or missing values become `now`.
pub fn parse_published(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_timestamp(s).unwrap_or_else(|| {
            tracing::warn!(target: "ingest", raw = s, "unparseable timestamp, using fetch time");
            now
        }),
        None => {
            tracing::debug!(target: "ingest", "missing timestamp, using fetch time");
            now
        }
    }
}

/// Drops the leading `"Mon, "`. The name must look like a weekday but is not
/// checked against the date; producers get it wrong often enough.
fn strip_weekday(s: &str) -> Option<&str> {
    let (day, rest) = s.split_once(',')?;
    let day = day.trim();
    if day.len() < 3 || !day.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(rest.trim_start())
}

fn parse_with_zone_name(s: &str, layout: &str) -> Option<DateTime<Utc>> {
    let (head, zone) = s.rsplit_once(' ')?;
    let offset = zone_offset(zone)?;
    let naive = NaiveDateTime::parse_from_str(head.trim_end(), layout).ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|d| d.with_timezone(&Utc))
}

/// Offsets for the zone abbreviations RSS producers actually emit.
/// Unknown abbreviations read as UTC.
fn zone_offset(zone: &str) -> Option<FixedOffset> {
    if zone.is_empty() || zone.len() > 5 || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let hours = match zone.to_ascii_uppercase().as_str() {
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        _ => 0, // UT, UTC, GMT, Z and anything unknown
    };
    FixedOffset::east_opt(hours * 3600)
}

/* ----------------------------
Labels
---------------------------- */

/// "just now" / "N minutes ago" / "N hours ago" / "N days ago", truncating.
pub fn elapsed_label(published: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - published).num_seconds();
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86_400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86_400)
    }
}

/// `"1h  5m"` at an hour or more, `"29m"` below. Truncated to whole minutes.
pub fn duration_label(ms: u64) -> String {
    let minutes = ms / 1000 / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{}h {:2}m", hours, minutes % 60)
    } else {
        format!("{:02}m", minutes)
    }
}

/* ----------------------------
Markup helpers
---------------------------- */

/// `src` of the first `<img>` that has one. Handles `"`, `'` and unquoted
/// values and rewrites protocol-relative URLs to https. Empty when absent.
///
/// Narrow on purpose: `data-src` and friends are not `src`, entities inside
/// the value are left alone, and an unquoted value runs to whitespace or `>`.
pub fn extract_thumbnail(markup: &str) -> String {
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?is)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
    });

    let Some(caps) = re.captures(markup) else {
        return String::new();
    };
    let src = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim())
        .unwrap_or_default();
    absolutize(src)
}

fn absolutize(url: &str) -> String {
    match url.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

/// Plain-text rendering of upstream markup: decode entities, drop tags,
/// fold whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > DESCRIPTION_CAP {
        out = out.chars().take(DESCRIPTION_CAP).collect();
    }
    out
}

/// Stable short id for articles: link when present, title otherwise.
pub fn rss_identity(link: &str, title: &str) -> String {
    use sha2::{Digest, Sha256};
    let basis = if link.is_empty() { title } else { link };
    let digest = Sha256::digest(basis.as_bytes());
    let mut out = String::with_capacity(4 + 12);
    out.push_str("rss:");
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
