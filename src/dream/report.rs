use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

use super::DreamEngine;
use crate::db::DreamLogEntry;
use crate::error::MetacogError;

#[derive(Debug, Clone, Serialize)]
pub struct DreamStats {
    pub dream_cycles: usize,
    pub total_archived_memories: usize,
    pub current_memory_count: usize,
    pub total_insights: usize,
    pub pending_feedback: usize,
    /// Feedback consumed by earlier cycles.
    pub feedback_archived: usize,
    pub archive_size: usize,
    pub last_dream: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdStatus {
    pub current_count: usize,
    pub threshold: usize,
    pub should_dream: bool,
}

/// Markdown rendering of one audit row.
pub fn render_report(e: &DreamLogEntry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Dream Report");
    let _ = writeln!(out, "Date: {}", e.archived_at.to_rfc3339());
    let _ = writeln!(out, "Memories Processed: {}", e.memories_processed);
    let _ = writeln!(out, "Memories Archived: {}", e.memories_archived);
    let _ = writeln!(out, "Feedback Used: {}", e.feedback_used);
    let _ = writeln!(out, "Previous Insights Used: {}", e.previous_insights_used);
    let _ = writeln!(out, "Duration: {} ms", e.duration_ms);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Generated Insights");
    for (i, insight) in e.insights_generated.iter().enumerate() {
        let _ = writeln!(out, "{}. {insight}", i + 1);
    }
    out
}

impl DreamEngine {
    pub async fn stats(&self) -> Result<DreamStats, MetacogError> {
        let history = self.store.dream_history().await?;
        let pending_feedback = self.store.list_feedback(None).await?.len();
        Ok(DreamStats {
            dream_cycles: history.len(),
            total_archived_memories: history.iter().map(|h| h.memories_archived).sum(),
            current_memory_count: self.store.count(None).await,
            total_insights: self.store.insight_count().await?,
            pending_feedback,
            feedback_archived: self.store.feedback_archived_count().await?,
            archive_size: self.store.archive_count().await?,
            last_dream: history.last().map(|h| h.archived_at),
            running: self.is_running(),
        })
    }

    /// Markdown summary of the most recent completed cycle.
    pub async fn last_report(&self) -> Result<Option<String>, MetacogError> {
        Ok(self.store.last_dream().await?.as_ref().map(render_report))
    }

    pub async fn threshold(&self) -> ThresholdStatus {
        let current_count = self.store.count(None).await;
        let threshold = self.cfg.memory_threshold;
        ThresholdStatus { current_count, threshold, should_dream: current_count >= threshold }
    }
}
