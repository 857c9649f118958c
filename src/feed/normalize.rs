//! Turns one heterogeneous `stream/items/contents` entry into an
//! [`ItemMetadata`] record plus the raw item body.
//!
//! None of the remote fields is guaranteed to exist, and present-but-null
//! fields are treated exactly like missing ones.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::ItemMetadata;

const SUMMARY_SOURCE_CHARS: usize = 512;
const SUMMARY_MAX_CHARS: usize = 140;
const ELLIPSIS: char = '…';

const LONG_ID_PREFIX: &str = "tag:google.com,2005:reader/item/";

#[derive(Debug, Default, Deserialize)]
pub struct RemoteItem {
    pub id: Option<String>,
    pub origin: Option<Origin>,
    pub author: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "timestampUsec")]
    pub timestamp_usec: Option<Timestamp>,
    /// Seconds since the epoch.
    pub updated: Option<Timestamp>,
    pub alternate: Option<Vec<Link>>,
    pub summary: Option<ContentBlock>,
    pub content: Option<ContentBlock>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Origin {
    #[serde(rename = "streamId")]
    pub stream_id: Option<String>,
    #[serde(rename = "htmlUrl")]
    pub html_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Link {
    pub href: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentBlock {
    pub content: Option<String>,
}

/// The API sends timestamps as JSON strings, but numbers show up too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Timestamp {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Timestamp::Int(v) => Some(*v as f64),
            Timestamp::Float(v) => Some(*v),
            Timestamp::Text(s) => s.trim().parse().ok(),
        }
    }

    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Timestamp::Int(v) => Some(*v),
            Timestamp::Float(v) => Some(*v as i64),
            Timestamp::Text(s) => s
                .trim()
                .parse()
                .ok()
                .or_else(|| self.as_f64().map(|v| v as i64)),
        }
    }

    fn seconds_to_usec(&self) -> Option<i64> {
        match self {
            Timestamp::Int(v) => Some(v.saturating_mul(1_000_000)),
            _ => self.as_f64().map(|v| (v * 1e6) as i64),
        }
    }
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<.+?>").expect("valid tag regex"))
}

fn space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\t\n\r]+").expect("valid whitespace regex"))
}

/// Drops HTML tags, trims, then removes embedded tab/newline runs.
pub fn strip_markup(text: &str) -> String {
    let without_tags = tag_re().replace_all(text, "");
    space_re().replace_all(without_tags.trim(), "").into_owned()
}

fn escape(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}

/// Maps a remote item id to the integer primary key.
///
/// Accepts the long `tag:google.com,2005:reader/item/<hex>` form, whose 64
/// bits are reinterpreted as a signed integer, and plain decimal ids.
pub fn short_id(id: &str) -> Result<i64> {
    let id = id.trim();
    if let Some(hex) = id.strip_prefix(LONG_ID_PREFIX) {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as i64)
            .map_err(|_| AppError::MalformedItem(format!("bad item id {id:?}")));
    }
    id.parse()
        .map_err(|_| AppError::MalformedItem(format!("bad item id {id:?}")))
}

/// Picks the item time in microseconds.
///
/// `timestampUsec` is the default; `updated` (seconds) replaces it only
/// when its microsecond value is strictly greater.
fn item_time(item: &RemoteItem) -> i64 {
    let default = item
        .timestamp_usec
        .as_ref()
        .and_then(Timestamp::as_i64)
        .unwrap_or(0);
    match item.updated.as_ref().and_then(Timestamp::seconds_to_usec) {
        Some(updated) if updated > default => updated,
        _ => default,
    }
}

fn summarize(content: &str) -> Option<String> {
    let stripped = strip_markup(content);
    if stripped.is_empty() {
        return None;
    }
    let source: String = stripped.chars().take(SUMMARY_SOURCE_CHARS).collect();
    let escaped = escape(&source);
    if escaped.chars().count() > SUMMARY_MAX_CHARS {
        let mut summary: String = escaped.chars().take(SUMMARY_MAX_CHARS - 1).collect();
        summary.push(ELLIPSIS);
        Some(summary)
    } else {
        Some(escaped)
    }
}

pub fn normalize(item: &RemoteItem) -> Result<(ItemMetadata, String)> {
    let origin = item.origin.as_ref();

    let subscription = origin
        .and_then(|o| o.stream_id.clone())
        .ok_or_else(|| AppError::MalformedItem("missing origin stream id".to_string()))?;

    let href = item
        .alternate
        .as_ref()
        .and_then(|links| links.first())
        .and_then(|link| link.href.clone())
        .or_else(|| origin.and_then(|o| o.html_url.clone()))
        .ok_or_else(|| AppError::MalformedItem("missing alternate link and origin url".to_string()))?;

    let content = item
        .summary
        .as_ref()
        .and_then(|block| block.content.clone())
        .or_else(|| item.content.as_ref().and_then(|block| block.content.clone()))
        .unwrap_or_default();

    let metadata = ItemMetadata {
        subscription,
        author: item.author.as_deref().map(escape),
        title: item.title.as_deref().map(|t| escape(&strip_markup(t))),
        summary: summarize(&content),
        href,
        time: item_time(item),
    };

    Ok((metadata, content))
}
