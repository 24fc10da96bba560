//! The memory store: one object owning the live index, the embedder and the
//! append-only logs. Constructed once at startup and shared through
//! `AppState`.

mod lifecycle;
mod search;

pub use lifecycle::{ArchiveResult, DeleteResult, FailedId, FailedIndex, PurgeResult, RestoreResult};
pub use search::{MatchType, SearchResult};

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ai::{Embedder, Framing};
use crate::category::Category;
use crate::config::SearchConfig;
use crate::db::{DreamLogEntry, FeedbackEntry, InsightEntry, MemoryRecord, Metadata, ResetReport, ResetScope, ThoughtLogEntry};
use crate::error::MetacogError;
use crate::index::{IndexFilter, VectorIndex};
use crate::thresholds::{MAX_CONTENT_CHARS, THOUGHT_EXPORT_LIMIT};
use crate::util::{memory_id, unique_now};
use crate::{blocking, db_call, keywords, EmbedCache, SharedDB};

/// Validate content and assemble a fresh record with id and keywords.
fn build_record(content: &str, category: Category, metadata: Metadata) -> Result<MemoryRecord, MetacogError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(MetacogError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(MetacogError::ContentTooLong);
    }
    let created_at = unique_now();
    Ok(MemoryRecord {
        id: memory_id(category.as_str(), created_at),
        content: content.to_string(),
        category,
        keywords: keywords::extract(content),
        metadata,
        created_at,
    })
}

/// Everything a dream cycle reads, taken in one go.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DreamExport {
    pub memories: Vec<MemoryRecord>,
    pub feedback: Vec<FeedbackEntry>,
    pub insights: Vec<InsightEntry>,
    /// The most recent reasoning steps only.
    pub thought_logs: Vec<ThoughtLogEntry>,
}

pub struct MemoryStore {
    db: SharedDB,
    index: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    cache: EmbedCache,
    cfg: SearchConfig,
}

impl MemoryStore {
    pub fn new(
        db: SharedDB,
        index: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn Embedder>>,
        cfg: SearchConfig,
    ) -> Self {
        let cache = EmbedCache::new(cfg.embed_cache_size);
        Self { db, index, embedder, cache, cfg }
    }

    /// The usual setup: the SQLite database doubles as the vector index.
    pub fn sqlite(db: SharedDB, embedder: Option<Arc<dyn Embedder>>, cfg: SearchConfig) -> Self {
        let index: Arc<dyn VectorIndex> = db.clone();
        Self::new(db, index, embedder, cfg)
    }

    pub fn config(&self) -> &SearchConfig {
        &self.cfg
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn embed_cache(&self) -> &EmbedCache {
        &self.cache
    }

    async fn embed(&self, text: &str, framing: Framing) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text, framing).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => {
                warn!("embedder returned an empty vector");
                None
            }
            Err(e) => {
                warn!(error = %e, ?framing, "embedding failed");
                None
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        if let Some(v) = self.cache.get(query) {
            return Some(v);
        }
        let v = self.embed(query, Framing::Query).await?;
        self.cache.insert(query.to_string(), v.clone());
        Some(v)
    }

    /// Validate and save one memory. Returns the new id.
    ///
    /// Unknown categories are coerced to the default; malformed ones and
    /// empty content are rejected.
    pub async fn save(
        &self,
        content: &str,
        category: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<String, MetacogError> {
        let category = Category::resolve(category)?;
        let rec = self.save_as(content, category, metadata.unwrap_or_default()).await?;
        Ok(rec.id)
    }

    /// Save with an already-resolved category. An unreachable index is
    /// logged and the record is returned unsaved; only validation fails.
    pub async fn save_as(
        &self,
        content: &str,
        category: Category,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MetacogError> {
        let rec = build_record(content, category, metadata)?;
        if let Err(e) = self.index_record(&rec).await {
            warn!(id = %rec.id, category = %category, error = %e, "save: index unavailable, memory not stored");
        }
        Ok(rec)
    }

    /// Like `save_as`, but an index failure is returned to the caller.
    /// Restore uses this so an outage never costs the archive entry.
    pub(crate) async fn save_strict(
        &self,
        content: &str,
        category: Category,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MetacogError> {
        let rec = build_record(content, category, metadata)?;
        self.index_record(&rec).await?;
        Ok(rec)
    }

    async fn index_record(&self, rec: &MemoryRecord) -> Result<(), MetacogError> {
        let embedding = self.embed(&rec.content, Framing::Passage).await;
        let has_vector = embedding.is_some();
        let index = self.index.clone();
        let stored = rec.clone();
        blocking(move || index.upsert(&stored, embedding.as_deref())).await??;

        info!(id = %rec.id, category = %rec.category, keywords = rec.keywords.len(), has_vector, "memory saved");
        Ok(())
    }

    /// Exact live count. Unavailable index counts as zero.
    pub async fn count(&self, category: Option<Category>) -> usize {
        let index = self.index.clone();
        match blocking(move || index.count(category)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!(error = %e, "count: index unavailable");
                0
            }
            Err(e) => {
                warn!(error = %e, "count: task failed");
                0
            }
        }
    }

    /// Live records in insertion order. Unavailable index lists nothing.
    pub async fn list(&self, category: Option<Category>, limit: Option<usize>) -> Vec<MemoryRecord> {
        let filter = match category {
            Some(c) => IndexFilter::category(c),
            None => IndexFilter::all(),
        };
        self.list_filtered(filter, limit).await
    }

    async fn list_filtered(&self, filter: IndexFilter, limit: Option<usize>) -> Vec<MemoryRecord> {
        let index = self.index.clone();
        match blocking(move || index.list(&filter, limit)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(error = %e, "list: index unavailable");
                vec![]
            }
            Err(e) => {
                warn!(error = %e, "list: task failed");
                vec![]
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MetacogError> {
        let index = self.index.clone();
        let id = id.to_string();
        Ok(blocking(move || index.get(&id)).await??)
    }

    /// Snapshot for a dream cycle. Unlike `list`, an unavailable index is an
    /// error here: a cycle must not run on a partial view.
    pub async fn export(&self) -> Result<DreamExport, MetacogError> {
        let index = self.index.clone();
        let memories = blocking(move || index.list(&IndexFilter::all(), None)).await??;
        let (feedback, insights, thought_logs) = db_call(&self.db, |db| {
            Ok::<_, MetacogError>((
                db.feedback_list(None)?,
                db.insights_list(None)?,
                db.thought_list(Some(THOUGHT_EXPORT_LIMIT))?,
            ))
        })
        .await??;
        Ok(DreamExport { memories, feedback, insights, thought_logs })
    }

    // --- feedback & insights ---

    pub async fn save_feedback(&self, feedback: &str, context: Metadata) -> Result<FeedbackEntry, MetacogError> {
        let feedback = feedback.trim().to_string();
        if feedback.is_empty() {
            return Err(MetacogError::Validation("feedback must not be empty".into()));
        }
        let entry = db_call(&self.db, move |db| db.feedback_append(&feedback, &context)).await??;
        info!(seq = entry.seq, "feedback recorded");
        Ok(entry)
    }

    pub async fn list_feedback(&self, limit: Option<usize>) -> Result<Vec<FeedbackEntry>, MetacogError> {
        db_call(&self.db, move |db| db.feedback_list(limit)).await?
    }

    pub async fn list_insights(&self, limit: Option<usize>) -> Result<Vec<InsightEntry>, MetacogError> {
        db_call(&self.db, move |db| db.insights_list(limit)).await?
    }

    /// Append one entry to the live insight log without rotating it.
    pub async fn append_insight(&self, entry: InsightEntry) -> Result<(), MetacogError> {
        db_call(&self.db, move |db| db.insights_append(&entry)).await?
    }

    pub async fn insight_count(&self) -> Result<usize, MetacogError> {
        db_call(&self.db, |db| db.insights_count()).await?
    }

    /// Rotate the insight log to `fresh`. Returns how many were rotated out.
    pub async fn replace_insights(&self, fresh: Vec<InsightEntry>) -> Result<usize, MetacogError> {
        db_call(&self.db, move |db| db.insights_replace(&fresh)).await?
    }

    /// Archive pending feedback up to and including `max_seq`.
    pub async fn archive_feedback_through(&self, max_seq: i64) -> Result<usize, MetacogError> {
        db_call(&self.db, move |db| db.feedback_archive_through(max_seq)).await?
    }

    pub async fn feedback_archived_count(&self) -> Result<usize, MetacogError> {
        db_call(&self.db, |db| db.feedback_archived_count()).await?
    }

    // --- thought steps ---

    pub async fn save_thought(
        &self,
        step: &str,
        thought: &str,
        memories_found: usize,
        extra: Metadata,
    ) -> Result<ThoughtLogEntry, MetacogError> {
        let (step, thought) = (step.trim().to_string(), thought.trim().to_string());
        if step.is_empty() || thought.is_empty() {
            return Err(MetacogError::Validation("step and thought must not be empty".into()));
        }
        let entry = db_call(&self.db, move |db| db.thought_append(&step, &thought, memories_found, &extra)).await??;
        info!(step = %entry.step, memories_found, "thought step recorded");
        Ok(entry)
    }

    pub async fn list_thoughts(&self, limit: Option<usize>) -> Result<Vec<ThoughtLogEntry>, MetacogError> {
        db_call(&self.db, move |db| db.thought_list(limit)).await?
    }

    // --- dream audit ---

    pub async fn append_dream_log(&self, entry: DreamLogEntry) -> Result<(), MetacogError> {
        db_call(&self.db, move |db| db.dream_log_append(&entry)).await?
    }

    pub async fn dream_history(&self) -> Result<Vec<DreamLogEntry>, MetacogError> {
        db_call(&self.db, |db| db.dream_log_list()).await?
    }

    pub async fn last_dream(&self) -> Result<Option<DreamLogEntry>, MetacogError> {
        db_call(&self.db, |db| db.dream_log_last()).await?
    }

    /// Wipe the live index and the logs `scope` covers. `Live` keeps the
    /// archives and the dream audit trail; `All` clears them too.
    pub async fn reset_all(&self, scope: ResetScope) -> Result<ResetReport, MetacogError> {
        let index = self.index.clone();
        let memories_deleted = blocking(move || index.clear()).await??;
        let mut report = db_call(&self.db, move |db| db.reset_logs(scope)).await??;
        report.memories_deleted = memories_deleted;
        self.cache.clear();
        warn!(
            ?scope,
            memories = report.memories_deleted,
            insights = report.insights_deleted,
            feedback = report.feedback_deleted,
            thoughts = report.thought_logs_deleted,
            archived = report.archived_deleted,
            dream_log = report.dream_log_deleted,
            "store reset"
        );
        Ok(report)
    }
}
