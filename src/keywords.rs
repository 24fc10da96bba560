//! Script-aware keyword extraction.
//!
//! Memories are mostly Japanese with English and product names mixed in,
//! so a whitespace tokenizer is useless. Instead we pull out runs of a
//! single script class with regexes and keep them in discovery order.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Upper bound on cached keywords per record.
pub const MAX_KEYWORDS: usize = 20;

struct Patterns {
    katakana: Regex,
    han: Regex,
    latin: Regex,
    mixed: Regex,
    alnum: Regex,
}

fn patterns() -> &'static Patterns {
    static INSTANCE: OnceLock<Patterns> = OnceLock::new();
    INSTANCE.get_or_init(|| Patterns {
        katakana: Regex::new(r"[\p{Katakana}ー]{2,}").expect("katakana pattern"),
        han: Regex::new(r"\p{Han}{2,}").expect("han pattern"),
        latin: Regex::new(r"[A-Za-z]{3,}").expect("latin pattern"),
        mixed: Regex::new(r"[A-Za-z\p{Han}]{2,}").expect("mixed pattern"),
        alnum: Regex::new(r"[A-Za-z0-9]+").expect("alnum pattern"),
    })
}

fn is_han(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3005}'
    )
}

/// Extract up to [`MAX_KEYWORDS`] salient tokens from `text`.
///
/// Classes are scanned in a fixed order (katakana, kanji, latin words,
/// latin+kanji compounds, alphanumeric ids) and the union keeps the first
/// occurrence of each token. Latin tokens are lower-cased.
pub fn extract(text: &str) -> Vec<String> {
    let p = patterns();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |tok: String| {
        if out.len() < MAX_KEYWORDS && seen.insert(tok.clone()) {
            out.push(tok);
        }
    };

    for m in p.katakana.find_iter(text) {
        push(m.as_str().to_string());
    }
    for m in p.han.find_iter(text) {
        push(m.as_str().to_string());
    }
    for m in p.latin.find_iter(text) {
        push(m.as_str().to_lowercase());
    }
    for m in p.mixed.find_iter(text) {
        let s = m.as_str();
        if s.chars().any(|c| c.is_ascii_alphabetic()) && s.chars().any(is_han) {
            push(s.to_string());
        }
    }
    for m in p.alnum.find_iter(text) {
        let s = m.as_str();
        if s.chars().any(|c| c.is_ascii_digit()) && s.chars().any(|c| c.is_ascii_alphabetic()) {
            push(s.to_lowercase());
        }
    }

    out
}
