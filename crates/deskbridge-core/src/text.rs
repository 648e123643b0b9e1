//! Plain-text and timestamp helpers shared by the engine and the adapters.

use std::sync::LazyLock;

use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]+>").expect("invalid html tag pattern"));

/// Strips markup from an HTML fragment, decodes entities, and collapses whitespace.
pub fn html_to_text(html: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(html, " ");
    html_escape::decode_html_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses the timestamp shapes both services and older mapping files emit.
///
/// Accepts RFC 3339, offsets without a colon (`+0000`), and naive values,
/// which are read as UTC. The result is always normalized to UTC.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed.to_offset(UtcOffset::UTC));
    }

    let normalized = normalize_offset(value);
    OffsetDateTime::parse(&normalized, &Rfc3339)
        .ok()
        .map(|parsed| parsed.to_offset(UtcOffset::UTC))
}

fn normalize_offset(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() > 5 {
        let split = bytes.len() - 5;
        let (head, tail) = value.split_at(split);
        let tail_bytes = tail.as_bytes();
        if matches!(tail_bytes[0], b'+' | b'-') && tail_bytes[1..].iter().all(u8::is_ascii_digit)
        {
            return format!("{head}{}:{}", &tail[..3], &tail[3..]);
        }
    }

    let time_part = value.split_once('T').map(|(_, time)| time).unwrap_or_default();
    let has_offset = time_part.ends_with(['Z', 'z']) || time_part.contains(['+', '-']);
    if has_offset {
        value.to_owned()
    } else {
        format!("{value}Z")
    }
}

pub fn format_timestamp(value: OffsetDateTime) -> String {
    value
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

pub fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}
