//! The vector index seam.
//!
//! The store never talks to SQLite directly for live records; it goes through
//! [`VectorIndex`] so a different backend (or a failing fake in tests) can be
//! dropped in. Every call returns `Result<_, CollaboratorError>` and the store
//! decides per call whether a failure degrades or propagates.

use crate::category::Category;
use crate::db::MemoryRecord;
use crate::error::CollaboratorError;

/// Which live records a call may see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFilter {
    pub category: Option<Category>,
    pub exclude: Vec<Category>,
}

impl IndexFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(c: Category) -> Self {
        Self { category: Some(c), exclude: vec![] }
    }

    /// Restricted to `category` if given, otherwise everything except the
    /// self-observation categories.
    pub fn for_search(category: Option<Category>) -> Self {
        match category {
            Some(c) => Self::category(c),
            None => Self {
                category: None,
                exclude: Category::excluded_from_general_search().to_vec(),
            },
        }
    }

    pub fn matches(&self, c: Category) -> bool {
        self.category.is_none_or(|want| want == c) && !self.exclude.contains(&c)
    }
}

/// One nearest-neighbour hit. `distance` is cosine distance (0 = identical).
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub record: MemoryRecord,
    pub distance: f64,
}

pub trait VectorIndex: Send + Sync {
    /// Insert or replace a record. `embedding` is `None` when the embedder
    /// was unavailable; the record is then only reachable lexically.
    fn upsert(&self, record: &MemoryRecord, embedding: Option<&[f32]>) -> Result<(), CollaboratorError>;

    /// Up to `k` nearest records by cosine distance, closest first.
    fn query(&self, embedding: &[f32], k: usize, filter: &IndexFilter) -> Result<Vec<Neighbor>, CollaboratorError>;

    fn get(&self, id: &str) -> Result<Option<MemoryRecord>, CollaboratorError>;

    /// Records in insertion order.
    fn list(&self, filter: &IndexFilter, limit: Option<usize>) -> Result<Vec<MemoryRecord>, CollaboratorError>;

    /// Up to `limit` records whose content or keywords contain any of
    /// `needles` (case-insensitive), newest first. The limit caps matches,
    /// not the rows examined.
    fn scan(&self, needles: &[String], filter: &IndexFilter, limit: usize) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        let needles: Vec<String> = needles
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        if needles.is_empty() || limit == 0 {
            return Ok(vec![]);
        }
        let mut hits: Vec<MemoryRecord> = self
            .list(filter, None)?
            .into_iter()
            .rev()
            .filter(|r| {
                let content = r.content.to_lowercase();
                needles
                    .iter()
                    .any(|n| content.contains(n) || r.keywords.iter().any(|k| k.to_lowercase().contains(n)))
            })
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }

    fn count(&self, category: Option<Category>) -> Result<usize, CollaboratorError>;

    /// Returns false if the id was not present.
    fn delete(&self, id: &str) -> Result<bool, CollaboratorError>;

    /// Drop every live record. Returns how many were removed.
    fn clear(&self) -> Result<usize, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_filter_hides_self_observation() {
        let f = IndexFilter::for_search(None);
        assert!(f.matches(Category::Chat));
        assert!(!f.matches(Category::Insight));
    }

    #[test]
    fn explicit_category_allows_self_observation() {
        let f = IndexFilter::for_search(Some(Category::Insight));
        assert!(f.matches(Category::Insight));
        assert!(!f.matches(Category::Chat));
    }
}
