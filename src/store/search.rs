//! Hybrid retrieval: a semantic pass over the vector index, a lexical pass
//! over the newest matching live records, then one merged ranking.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::MemoryStore;
use crate::blocking;
use crate::category::Category;
use crate::config::SearchConfig;
use crate::db::MemoryRecord;
use crate::index::{IndexFilter, Neighbor};
use crate::keywords;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Semantic,
    Keyword,
    CategoryFilter,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub category: Category,
    pub keywords: Vec<String>,
    pub relevance: f64,
    pub match_type: MatchType,
}

impl SearchResult {
    fn from_record(rec: MemoryRecord, relevance: f64, match_type: MatchType) -> Self {
        Self {
            id: rec.id,
            content: rec.content,
            category: rec.category,
            keywords: rec.keywords,
            relevance,
            match_type,
        }
    }
}

/// Cosine distance to relevance, clamped at zero.
pub(crate) fn relevance_from_distance(distance: f64) -> f64 {
    (1.0 - distance).max(0.0)
}

pub(crate) fn semantic_hits(neighbors: Vec<Neighbor>, floor: f64) -> Vec<SearchResult> {
    neighbors
        .into_iter()
        .filter_map(|n| {
            let rel = relevance_from_distance(n.distance);
            (rel >= floor).then(|| SearchResult::from_record(n.record, rel, MatchType::Semantic))
        })
        .collect()
}

/// Best lexical tier `rec` reaches for `query`, if any.
pub(crate) fn lexical_score(query: &str, query_keywords: &[String], rec: &MemoryRecord, cfg: &SearchConfig) -> Option<f64> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return None;
    }
    let content = rec.content.to_lowercase();
    if content.contains(&q) {
        return Some(cfg.content_score);
    }
    let kws: Vec<String> = rec.keywords.iter().map(|k| k.to_lowercase()).collect();
    if kws.iter().any(|k| k.contains(&q)) {
        return Some(cfg.keyword_score);
    }
    let overlap = query_keywords.iter().any(|qk| {
        let qk = qk.to_lowercase();
        content.contains(&qk) || kws.contains(&qk)
    });
    overlap.then_some(cfg.overlap_score)
}

/// Union by id, keeping the first occurrence unless a later one scores
/// strictly higher; then a stable sort by relevance, descending.
pub(crate) fn merge_ranked(passes: Vec<Vec<SearchResult>>, accept: Option<f64>, limit: usize) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut pos: HashMap<String, usize> = HashMap::new();
    for hit in passes.into_iter().flatten() {
        match pos.get(&hit.id) {
            Some(&i) => {
                if hit.relevance > merged[i].relevance {
                    merged[i] = hit;
                }
            }
            None => {
                pos.insert(hit.id.clone(), merged.len());
                merged.push(hit);
            }
        }
    }
    merged.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(t) = accept {
        merged.retain(|r| r.relevance >= t);
    }
    merged.truncate(limit);
    merged
}

impl MemoryStore {
    /// Ranked hybrid search. Never fails: collaborator trouble means fewer
    /// (or no) results plus a warning.
    pub async fn search(&self, query: &str, limit: usize, category: Option<Category>) -> Vec<SearchResult> {
        if limit == 0 {
            return vec![];
        }
        let query = query.trim();
        if query.is_empty() {
            let Some(c) = category else {
                return vec![];
            };
            let score = self.cfg.category_score;
            return self
                .list(Some(c), Some(limit))
                .await
                .into_iter()
                .map(|r| SearchResult::from_record(r, score, MatchType::CategoryFilter))
                .collect();
        }

        let filter = IndexFilter::for_search(category);
        let semantic = self.semantic_pass(query, limit, &filter).await;
        let lexical = self.lexical_pass(query, filter).await;
        let (n_sem, n_lex) = (semantic.len(), lexical.len());

        let out = merge_ranked(vec![semantic, lexical], self.cfg.accept_threshold, limit);
        debug!(query, semantic = n_sem, lexical = n_lex, returned = out.len(), "search");
        out
    }

    async fn semantic_pass(&self, query: &str, limit: usize, filter: &IndexFilter) -> Vec<SearchResult> {
        let Some(qv) = self.embed_query(query).await else {
            return vec![];
        };
        let k = limit.saturating_mul(2).min(self.cfg.max_neighbors);
        let index = self.index.clone();
        let filter = filter.clone();
        match blocking(move || index.query(&qv, k, &filter)).await {
            Ok(Ok(neighbors)) => semantic_hits(neighbors, self.cfg.semantic_floor),
            Ok(Err(e)) => {
                warn!(error = %e, "semantic pass: index unavailable");
                vec![]
            }
            Err(e) => {
                warn!(error = %e, "semantic pass: task failed");
                vec![]
            }
        }
    }

    async fn lexical_pass(&self, query: &str, filter: IndexFilter) -> Vec<SearchResult> {
        let query_keywords = keywords::extract(query);
        let mut needles = vec![query.to_string()];
        needles.extend(query_keywords.iter().cloned());
        let index = self.index.clone();
        let cap = self.cfg.scan_limit;
        let candidates = match blocking(move || index.scan(&needles, &filter, cap)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(error = %e, "lexical pass: index unavailable");
                vec![]
            }
            Err(e) => {
                warn!(error = %e, "lexical pass: task failed");
                vec![]
            }
        };
        candidates
            .into_iter()
            .filter_map(|rec| {
                let score = lexical_score(query, &query_keywords, &rec, &self.cfg)?;
                Some(SearchResult::from_record(rec, score, MatchType::Keyword))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Metadata;
    use chrono::Utc;

    fn rec(id: &str, content: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            content: content.into(),
            category: Category::Chat,
            keywords: keywords::extract(content),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    fn hit(id: &str, relevance: f64, match_type: MatchType) -> SearchResult {
        SearchResult::from_record(rec(id, id), relevance, match_type)
    }

    #[test]
    fn floor_is_inclusive() {
        let cfg = SearchConfig::default();
        let at = Neighbor { record: rec("at", "x"), distance: 0.7 };
        let below = Neighbor { record: rec("below", "x"), distance: 0.70001 };
        let got = semantic_hits(vec![at, below], cfg.semantic_floor);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "at");
    }

    #[test]
    fn relevance_never_negative() {
        assert_eq!(relevance_from_distance(1.7), 0.0);
        assert_eq!(relevance_from_distance(0.0), 1.0);
    }

    #[test]
    fn lexical_tiers() {
        let cfg = SearchConfig::default();
        let r = rec("1", "Rust の SQLite バインディング");
        assert_eq!(lexical_score("sqlite", &[], &r, &cfg), Some(0.9));
        assert_eq!(lexical_score("SQLITE", &[], &r, &cfg), Some(0.9));

        let mut kw = rec("2", "something else");
        kw.keywords = vec!["バインディング".into()];
        assert_eq!(lexical_score("バインド", &[], &kw, &cfg), None);
        assert_eq!(lexical_score("インディ", &[], &kw, &cfg), Some(0.85));

        let q = "ケーキとコーヒー";
        let qk = keywords::extract(q);
        let r = rec("3", "好きなのはケーキ");
        assert_eq!(lexical_score(q, &qk, &r, &cfg), Some(0.7));
        assert_eq!(lexical_score("紅茶", &keywords::extract("紅茶"), &r, &cfg), None);
    }

    #[test]
    fn merge_keeps_first_unless_strictly_higher() {
        let out = merge_ranked(
            vec![
                vec![hit("a", 0.9, MatchType::Semantic), hit("b", 0.5, MatchType::Semantic)],
                vec![hit("a", 0.9, MatchType::Keyword), hit("b", 0.85, MatchType::Keyword)],
            ],
            None,
            10,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].match_type, MatchType::Semantic);
        assert_eq!(out[1].id, "b");
        assert_eq!(out[1].match_type, MatchType::Keyword);
        assert_eq!(out[1].relevance, 0.85);
    }

    #[test]
    fn merge_is_stable_and_truncates() {
        let out = merge_ranked(
            vec![vec![hit("s", 0.7, MatchType::Semantic)], vec![hit("k", 0.7, MatchType::Keyword), hit("top", 0.95, MatchType::Keyword)]],
            None,
            2,
        );
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "s"]);
    }

    #[test]
    fn accept_threshold_filters() {
        let out = merge_ranked(vec![vec![hit("a", 0.9, MatchType::Keyword), hit("b", 0.7, MatchType::Keyword)]], Some(0.8), 10);
        assert_eq!(out.len(), 1);
    }
}
