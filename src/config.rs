//! Environment-driven tuning for search and dreaming.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::thresholds::*;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub semantic_floor: f64,
    pub content_score: f64,
    pub keyword_score: f64,
    pub overlap_score: f64,
    pub category_score: f64,
    pub scan_limit: usize,
    pub max_neighbors: usize,
    /// Final cut applied after merging. Off by default.
    pub accept_threshold: Option<f64>,
    pub embed_cache_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_floor: SEMANTIC_FLOOR,
            content_score: CONTENT_MATCH_SCORE,
            keyword_score: KEYWORD_MATCH_SCORE,
            overlap_score: KEYWORD_OVERLAP_SCORE,
            category_score: CATEGORY_FILTER_SCORE,
            scan_limit: LEXICAL_SCAN_LIMIT,
            max_neighbors: MAX_NEIGHBORS,
            accept_threshold: None,
            embed_cache_size: 128,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            semantic_floor: env_or("METACOG_SEARCH_SEMANTIC_FLOOR", d.semantic_floor),
            content_score: env_or("METACOG_SEARCH_CONTENT_SCORE", d.content_score),
            keyword_score: env_or("METACOG_SEARCH_KEYWORD_SCORE", d.keyword_score),
            overlap_score: env_or("METACOG_SEARCH_OVERLAP_SCORE", d.overlap_score),
            category_score: env_or("METACOG_SEARCH_CATEGORY_SCORE", d.category_score),
            scan_limit: env_or("METACOG_SEARCH_SCAN_LIMIT", d.scan_limit),
            max_neighbors: env_or("METACOG_SEARCH_MAX_NEIGHBORS", d.max_neighbors),
            accept_threshold: std::env::var("METACOG_SEARCH_ACCEPT_THRESHOLD")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            embed_cache_size: env_or("METACOG_SEARCH_EMBED_CACHE", d.embed_cache_size),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DreamConfig {
    pub memory_threshold: usize,
    /// Run a cycle from the background loop once the threshold is reached.
    pub auto_trigger: bool,
    /// Never below one second.
    pub check_interval: Duration,
    pub timeout: Duration,
    pub fallback_chars: usize,
    pub temperature: f64,
    /// Replaces the built-in template. Must keep the three placeholders.
    pub prompt_template: Option<String>,
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self {
            memory_threshold: DREAM_MEMORY_THRESHOLD,
            auto_trigger: false,
            check_interval: Duration::from_secs(600),
            timeout: Duration::from_secs(600),
            fallback_chars: DREAM_FALLBACK_CHARS,
            temperature: 0.7,
            prompt_template: None,
        }
    }
}

impl DreamConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let prompt_template = std::env::var("METACOG_DREAM_PROMPT_FILE").ok().and_then(|path| {
            match std::fs::read_to_string(&path) {
                Ok(t) if !t.trim().is_empty() => Some(t),
                Ok(_) => {
                    warn!(path = %path, "dream prompt file is empty, using built-in");
                    None
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "can't read dream prompt file, using built-in");
                    None
                }
            }
        });
        Self {
            memory_threshold: env_or("METACOG_DREAM_THRESHOLD", d.memory_threshold),
            auto_trigger: env_bool("METACOG_DREAM_AUTO", d.auto_trigger),
            check_interval: Duration::from_secs(env_or("METACOG_DREAM_CHECK_SECS", d.check_interval.as_secs()).max(1)),
            timeout: Duration::from_secs(env_or("METACOG_DREAM_TIMEOUT_SECS", d.timeout.as_secs())),
            fallback_chars: env_or("METACOG_DREAM_FALLBACK_CHARS", d.fallback_chars),
            temperature: env_or("METACOG_DREAM_TEMPERATURE", d.temperature),
            prompt_template,
        }
    }
}
