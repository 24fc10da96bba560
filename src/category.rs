use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::MetacogError;

const MAX_CATEGORY_LEN: usize = 32;

/// Where a memory came from. The set is closed: anything else is coerced to
/// [`Category::DEFAULT`] at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// `[SAVE]` items pulled out of an assistant reply.
    Chat,
    /// Saved on purpose through the tool/API surface.
    Voluntary,
    /// The assistant's observations about itself. Kept out of general
    /// searches so it doesn't quote itself back.
    Insight,
    /// Produced by a dream cycle.
    DreamInsight,
    /// Auto-saved user side of a chat exchange.
    Exchange,
}

impl Category {
    pub const DEFAULT: Category = Category::Voluntary;

    pub const ALL: [Category; 5] = [
        Category::Chat,
        Category::Voluntary,
        Category::Insight,
        Category::DreamInsight,
        Category::Exchange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Chat => "chat",
            Category::Voluntary => "voluntary",
            Category::Insight => "insight",
            Category::DreamInsight => "dream_insight",
            Category::Exchange => "exchange",
        }
    }

    /// Categories general (unfiltered) searches leave out.
    pub fn excluded_from_general_search() -> &'static [Category] {
        &[Category::Insight]
    }

    /// Resolve a caller-supplied category string.
    ///
    /// Malformed input (too long, control characters) is a validation error.
    /// Well-formed but unknown names fall back to the default with a warning.
    pub fn resolve(raw: Option<&str>) -> Result<Category, MetacogError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Category::DEFAULT);
        };
        if raw.chars().count() > MAX_CATEGORY_LEN || raw.chars().any(char::is_control) {
            return Err(MetacogError::MalformedCategory(raw.to_string()));
        }
        match raw.parse() {
            Ok(c) => Ok(c),
            Err(_) => {
                warn!(category = raw, fallback = Category::DEFAULT.as_str(), "unknown category, coercing");
                Ok(Category::DEFAULT)
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown category name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}
