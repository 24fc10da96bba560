/// Default relevance scores and limits for retrieval and dreaming.
///
/// Every value here is only a default; `config::SearchConfig` and
/// `config::DreamConfig` read overrides from the environment.

/// Semantic hits below this relevance (1 − cosine distance) are dropped
pub const SEMANTIC_FLOOR: f64 = 0.3;

/// Lexical: the whole query appears in the content (case-insensitive)
pub const CONTENT_MATCH_SCORE: f64 = 0.9;

/// Lexical: the whole query appears inside one cached keyword
pub const KEYWORD_MATCH_SCORE: f64 = 0.85;

/// Lexical: some keyword of the query shows up in content or keywords
pub const KEYWORD_OVERLAP_SCORE: f64 = 0.7;

/// Category listing with an empty query
pub const CATEGORY_FILTER_SCORE: f64 = 0.8;

/// Lexical pass keeps no more than this many matching records, newest first
pub const LEXICAL_SCAN_LIMIT: usize = 1000;

/// Hard cap on nearest neighbours fetched per semantic pass
pub const MAX_NEIGHBORS: usize = 20;

/// Live memory count at which a dream cycle is due
pub const DREAM_MEMORY_THRESHOLD: usize = 30;

/// Whole-reply fallback insight length when nothing parses
pub const DREAM_FALLBACK_CHARS: usize = 500;

/// Failure reasons are cut to this for display
pub const FAILURE_DISPLAY_CHARS: usize = 200;

/// Longest accepted memory content
pub const MAX_CONTENT_CHARS: usize = 8192;

/// Recent thought-log entries carried into a dream export
pub const THOUGHT_EXPORT_LIMIT: usize = 20;
