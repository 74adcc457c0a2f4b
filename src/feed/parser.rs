//! Tag-level RSS extraction.
//!
//! This is deliberately not a feed parser: the payload is treated as text,
//! `<item>` regions are cut out and a handful of child tags are read from
//! each. Malformed documents degrade to fewer entries instead of failing.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::NewPost;

const ELLIPSIS: &str = "...";

/// One `<item>` region, fields as found in the payload (CDATA unwrapped,
/// entities decoded, markup untouched).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub pub_date: Option<String>,
    pub creator: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
}

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<item(?:\s[^>]*)?>(.*?)</item>").expect("valid item regex"))
}

fn item_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<item[\s>]").expect("valid item regex"))
}

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid markup regex"))
}

fn post_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/post-(\d+)(?:-|$|[/?#])").expect("valid post regex"))
}

/// Split a payload into raw entries.
///
/// Zero entries from a document that looks like a feed is a valid empty
/// result. A payload with no feed markers at all, or with `<item>` openings
/// that never close, is a parse error.
pub fn parse_entries(payload: &str) -> Result<Vec<RawEntry>> {
    let entries: Vec<RawEntry> = item_re()
        .captures_iter(payload)
        .filter_map(|cap| cap.get(1))
        .map(|region| parse_region(region.as_str()))
        .collect();

    if entries.is_empty() {
        let opened = item_open_re().find_iter(payload).count();
        if opened > 0 {
            return Err(AppError::Parse(format!(
                "found {} <item> tag(s) but no complete item",
                opened
            )));
        }
        let looks_like_feed = ["<rss", "<channel", "<feed", "<rdf:RDF"]
            .iter()
            .any(|marker| payload.contains(marker));
        if !looks_like_feed {
            return Err(AppError::Parse("payload is not an RSS document".to_string()));
        }
    }

    Ok(entries)
}

fn parse_region(region: &str) -> RawEntry {
    let field = |tags: &[&str]| {
        tags.iter()
            .find_map(|tag| extract_tag(region, tag))
            .map(unwrap_text)
            .filter(|s| !s.trim().is_empty())
    };

    RawEntry {
        title: field(&["title"]),
        link: field(&["link"]),
        guid: field(&["guid"]),
        pub_date: field(&["pubDate", "dc:date"]),
        creator: field(&["dc:creator", "author"]),
        category: field(&["category"]),
        description: field(&["description"]),
        content: field(&["content:encoded", "content"]),
    }
}

/// Inner text of the first `<tag ...>...</tag>` in `region`.
fn extract_tag<'a>(region: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut from = 0;

    while let Some(rel) = region[from..].find(&open) {
        let name_end = from + rel + open.len();
        // `<category` must not match `<categoryX`.
        match region[name_end..].chars().next() {
            Some('>' | '/' | ' ' | '\t' | '\r' | '\n') => {}
            _ => {
                from = name_end;
                continue;
            }
        }
        let tag_close = name_end + region[name_end..].find('>')?;
        if region[..tag_close].ends_with('/') {
            return Some("");
        }
        let body_start = tag_close + 1;
        let body_len = region[body_start..].find(&close)?;
        return Some(&region[body_start..body_start + body_len]);
    }

    None
}

/// Unwrap CDATA sections; decode entities in everything outside them.
fn unwrap_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("<![CDATA[") {
        out.push_str(&decode_entities(&rest[..start]));
        let inner = &rest[start + "<![CDATA[".len()..];
        match inner.find("]]>") {
            Some(end) => {
                out.push_str(&inner[..end]);
                rest = &inner[end + "]]>".len()..];
            }
            None => {
                out.push_str(inner);
                rest = "";
            }
        }
    }
    out.push_str(&decode_entities(rest));
    out.trim().to_string()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove tags, decode what the markup escaped and collapse whitespace.
pub fn strip_markup(html: &str) -> String {
    let without_tags = markup_re().replace_all(html, " ");
    collapse_whitespace(&decode_entities(&without_tags))
}

/// Truncate to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}{}", kept.trim_end(), ELLIPSIS)
}

fn body_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 10_000) {
        Ok(text) => collapse_whitespace(&text),
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            strip_markup(html)
        }
    }
}

/// Numeric post id from a link: the `/post-{id}-...` path form first, then
/// an `id` query parameter.
pub fn extract_post_id(link: &str) -> Option<i64> {
    if let Some(id) = post_path_re()
        .captures(link)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(id);
    }

    url::Url::parse(link).ok().and_then(|url| {
        url.query_pairs()
            .find(|(key, _)| key == "id")
            .and_then(|(_, value)| value.parse().ok())
    })
}

pub fn parse_pub_date(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim) else {
        return fallback;
    };
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::debug!("Unparseable pubDate {:?}, using ingestion time", raw);
            fallback
        })
}

/// Turn a raw entry into a storable post. Entries without a derivable id
/// are dropped.
pub fn normalize(entry: RawEntry, summary_max_chars: usize, now: DateTime<Utc>) -> Option<NewPost> {
    let post_id = entry
        .link
        .as_deref()
        .and_then(extract_post_id)
        .or_else(|| entry.guid.as_deref().and_then(extract_post_id));

    let Some(post_id) = post_id else {
        tracing::warn!(
            "Dropping entry without a post id (title: {:?}, link: {:?})",
            entry.title,
            entry.link
        );
        return None;
    };

    let description = entry.description.unwrap_or_default();
    let summary = truncate_chars(&strip_markup(&description), summary_max_chars);
    let content = match entry.content.as_deref() {
        Some(html) => body_text(html),
        None => body_text(&description),
    };

    Some(NewPost {
        post_id,
        // Titles are plain text; entities were already decoded once.
        title: collapse_whitespace(entry.title.as_deref().unwrap_or_default()),
        summary,
        content,
        category: collapse_whitespace(entry.category.as_deref().unwrap_or_default()),
        creator: collapse_whitespace(entry.creator.as_deref().unwrap_or_default()),
        pub_date: parse_pub_date(entry.pub_date.as_deref(), now),
    })
}

/// Parse and normalize a whole payload.
pub fn parse_posts(payload: &str, summary_max_chars: usize) -> Result<Vec<NewPost>> {
    let now = Utc::now();
    let posts = parse_entries(payload)?
        .into_iter()
        .filter_map(|entry| normalize(entry, summary_max_chars, now))
        .collect();
    Ok(posts)
}
