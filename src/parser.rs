//! Turns free-form generated text into structured entries.
//!
//! Used on both sides: assistant chat replies (`parse_response`, which also
//! pulls out `[SAVE]` lines) and dream output (`parse_entries`).

use serde::Serialize;

pub const INSIGHT_HEADER: &str = "## 気づき";
pub const SAVE_MARKER: &str = "[SAVE]";
pub const SEPARATOR: &str = "---";

/// Untagged bullet/numbered lines shorter than this are noise.
pub const MIN_ENTRY_CHARS: usize = 5;

const MAX_TAG_CHARS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedResponse {
    /// Text for the user: `[SAVE]` lines and the insight section removed.
    pub response: String,
    pub insights: Vec<ParsedEntry>,
    pub saves: Vec<String>,
    pub raw: String,
}

fn strip_bullet(line: &str) -> Option<&str> {
    ["- ", "* ", "・", "•"]
        .iter()
        .find_map(|b| line.strip_prefix(b))
        .map(str::trim_start)
}

/// `12. rest` / `12) rest`
fn strip_number(line: &str) -> Option<&str> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))
        .map(str::trim_start)
}

/// `A1. rest` → ("A", rest)
fn strip_lettered(line: &str) -> Option<(String, &str)> {
    let mut chars = line.chars();
    let letter = chars.next().filter(char::is_ascii_alphabetic)?;
    let rest = &line[1..];
    let body = strip_number(rest)?;
    Some((letter.to_ascii_uppercase().to_string(), body))
}

/// `[tag] rest` → (tag, rest). Empty tags or bodies don't count.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?;
    let close = inner.find(']')?;
    let tag = inner[..close].trim();
    let body = inner[close + 1..].trim();
    if tag.is_empty() || body.is_empty() || tag.chars().count() > MAX_TAG_CHARS {
        return None;
    }
    Some((tag, body))
}

fn is_save_line(line: &str) -> bool {
    let line = strip_bullet(line).unwrap_or(line);
    line.get(..SAVE_MARKER.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(SAVE_MARKER))
}

fn entry_from_body(body: &str, tag: Option<String>) -> Option<ParsedEntry> {
    if let Some((t, rest)) = split_tag(body) {
        return Some(ParsedEntry { category: Some(t.to_string()), content: rest.to_string() });
    }
    let body = body.trim();
    match tag {
        Some(t) if !body.is_empty() => Some(ParsedEntry { category: Some(t), content: body.to_string() }),
        None if body.chars().count() >= MIN_ENTRY_CHARS => {
            Some(ParsedEntry { category: None, content: body.to_string() })
        }
        _ => None,
    }
}

fn parse_line(line: &str) -> Option<ParsedEntry> {
    let line = line.trim();
    if line.is_empty() || is_save_line(line) {
        return None;
    }
    if let Some((tag, body)) = split_tag(line) {
        return Some(ParsedEntry { category: Some(tag.to_string()), content: body.to_string() });
    }
    if let Some(body) = strip_bullet(line) {
        return entry_from_body(body, None);
    }
    if let Some(body) = strip_number(line) {
        return entry_from_body(body, None);
    }
    if let Some((tag, body)) = strip_lettered(line) {
        return entry_from_body(body, Some(tag));
    }
    None
}

/// Line-oriented entry extraction. Lines that are not tagged, bulleted or
/// numbered are ignored; `[SAVE]` lines never become entries.
pub fn parse_entries(text: &str) -> Vec<ParsedEntry> {
    text.lines().filter_map(parse_line).collect()
}

/// Split an assistant reply into the user-facing text, the insight
/// section entries and the `[SAVE]` items.
pub fn parse_response(raw: &str) -> ParsedResponse {
    if raw.trim().is_empty() {
        return ParsedResponse::default();
    }

    let mut saves = Vec::new();
    let mut kept = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if is_save_line(trimmed) {
            let body = strip_bullet(trimmed).unwrap_or(trimmed);
            let item = body[SAVE_MARKER.len()..].trim();
            if !item.is_empty() {
                saves.push(item.to_string());
            }
        } else {
            kept.push(line);
        }
    }
    let text = kept.join("\n");

    let (response, insights) = match text.split_once(INSIGHT_HEADER) {
        Some((before, after)) => {
            let before = before.trim_end();
            let before = before.strip_suffix(SEPARATOR).unwrap_or(before).trim_end();
            (before.to_string(), parse_entries(after))
        }
        None => (text.trim_end().to_string(), vec![]),
    };

    ParsedResponse { response, insights, saves, raw: raw.to_string() }
}
