//! Append-only logs: memory archive, feedback, insights, thought steps,
//! dream audit.

use rusqlite::params;

use super::*;
use crate::error::MetacogError;

/// Newest `limit` rows, returned oldest first.
fn tail_sql(table: &str, cols: &str, limit: Option<usize>) -> String {
    match limit {
        Some(n) => format!(
            "SELECT {cols} FROM (SELECT * FROM {table} ORDER BY seq DESC LIMIT {n}) ORDER BY seq ASC"
        ),
        None => format!("SELECT {cols} FROM {table} ORDER BY seq ASC"),
    }
}

fn row_to_archived(row: &rusqlite::Row) -> rusqlite::Result<ArchivedMemory> {
    let category: String = row.get("category")?;
    let keywords: String = row.get("keywords")?;
    let metadata: String = row.get("metadata")?;
    Ok(ArchivedMemory {
        seq: row.get("seq")?,
        memory_id: row.get("memory_id")?,
        content: row.get("content")?,
        category: category_from_sql(&category),
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get("created_at")?,
        archived_at: row.get("archived_at")?,
    })
}

fn row_to_feedback(row: &rusqlite::Row) -> rusqlite::Result<FeedbackEntry> {
    let context: String = row.get("context")?;
    Ok(FeedbackEntry {
        seq: row.get("seq")?,
        timestamp: row.get("ts")?,
        feedback: row.get("feedback")?,
        context: serde_json::from_str(&context).unwrap_or_default(),
    })
}

fn row_to_insight(row: &rusqlite::Row) -> rusqlite::Result<InsightEntry> {
    Ok(InsightEntry {
        timestamp: row.get("ts")?,
        content: row.get("content")?,
        category: row.get("category")?,
        source: row.get("source")?,
    })
}

fn row_to_thought(row: &rusqlite::Row) -> rusqlite::Result<ThoughtLogEntry> {
    let extra: String = row.get("extra")?;
    Ok(ThoughtLogEntry {
        timestamp: row.get("ts")?,
        step: row.get("step")?,
        thought: row.get("thought")?,
        memories_found: row.get::<_, i64>("memories_found")? as usize,
        extra: serde_json::from_str(&extra).unwrap_or_default(),
    })
}

fn row_to_dream_log(row: &rusqlite::Row) -> rusqlite::Result<DreamLogEntry> {
    let insights: String = row.get("insights")?;
    Ok(DreamLogEntry {
        archived_at: row.get("archived_at")?,
        memories_processed: row.get::<_, i64>("memories_processed")? as usize,
        memories_archived: row.get::<_, i64>("memories_archived")? as usize,
        feedback_used: row.get::<_, i64>("feedback_used")? as usize,
        previous_insights_used: row.get::<_, i64>("previous_insights_used")? as usize,
        insights_generated: serde_json::from_str(&insights).unwrap_or_default(),
        duration_ms: row.get::<_, i64>("duration_ms")? as u64,
    })
}

impl MemoryDB {
    // --- memory archive ---

    /// Append to the archive log. Returns the new entry's seq.
    pub fn archive_append(&self, entry: &ArchivedMemory) -> Result<i64, MetacogError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memory_archive (memory_id, content, category, keywords, metadata, created_at, archived_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.memory_id,
                entry.content,
                entry.category.as_str(),
                to_json(&entry.keywords),
                to_json(&entry.metadata),
                entry.created_at,
                entry.archived_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Archive entries, oldest first. Positions in this list are the indices
    /// restore and purge take.
    pub fn archive_list(&self) -> Result<Vec<ArchivedMemory>, MetacogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, memory_id, content, category, keywords, metadata, created_at, archived_at \
             FROM memory_archive ORDER BY seq ASC",
        )?;
        let entries = stmt.query_map([], row_to_archived)?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn archive_remove(&self, seq: i64) -> Result<bool, MetacogError> {
        let n = self.conn()?.execute("DELETE FROM memory_archive WHERE seq = ?1", params![seq])?;
        Ok(n > 0)
    }

    pub fn archive_count(&self) -> Result<usize, MetacogError> {
        let n: i64 = self.conn()?.query_row("SELECT COUNT(*) FROM memory_archive", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    // --- feedback ---

    pub fn feedback_append(&self, feedback: &str, context: &Metadata) -> Result<FeedbackEntry, MetacogError> {
        let timestamp = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO feedback (ts, feedback, context) VALUES (?1, ?2, ?3)",
            params![timestamp, feedback, to_json(context)],
        )?;
        Ok(FeedbackEntry {
            seq: conn.last_insert_rowid(),
            timestamp,
            feedback: feedback.to_string(),
            context: context.clone(),
        })
    }

    /// Pending feedback, oldest first. `limit` keeps the newest N.
    pub fn feedback_list(&self, limit: Option<usize>) -> Result<Vec<FeedbackEntry>, MetacogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&tail_sql("feedback", "seq, ts, feedback, context", limit))?;
        let entries = stmt.query_map([], row_to_feedback)?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Move pending feedback with `seq <= max_seq` to the archived table.
    /// Later entries stay pending.
    pub fn feedback_archive_through(&self, max_seq: i64) -> Result<usize, MetacogError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO feedback_archived (ts, feedback, context, archived_at) \
             SELECT ts, feedback, context, ?2 FROM feedback WHERE seq <= ?1 ORDER BY seq",
            params![max_seq, Utc::now()],
        )?;
        let n = tx.execute("DELETE FROM feedback WHERE seq <= ?1", params![max_seq])?;
        tx.commit()?;
        Ok(n)
    }

    pub fn feedback_archived_count(&self) -> Result<usize, MetacogError> {
        let n: i64 = self.conn()?.query_row("SELECT COUNT(*) FROM feedback_archived", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    // --- insights ---

    pub fn insights_list(&self, limit: Option<usize>) -> Result<Vec<InsightEntry>, MetacogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&tail_sql("insights", "ts, content, category, source", limit))?;
        let entries = stmt.query_map([], row_to_insight)?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn insights_append(&self, entry: &InsightEntry) -> Result<(), MetacogError> {
        self.conn()?.execute(
            "INSERT INTO insights (ts, content, category, source) VALUES (?1, ?2, ?3, ?4)",
            params![entry.timestamp, entry.content, entry.category, entry.source],
        )?;
        Ok(())
    }

    /// Rotate the insight log: current entries move to `insights_archived`,
    /// `fresh` becomes the new log. One transaction. Returns how many rotated out.
    pub fn insights_replace(&self, fresh: &[InsightEntry]) -> Result<usize, MetacogError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO insights_archived (ts, content, category, source, archived_at) \
             SELECT ts, content, category, source, ?1 FROM insights ORDER BY seq",
            params![Utc::now()],
        )?;
        let rotated = tx.execute("DELETE FROM insights", [])?;
        for e in fresh {
            tx.execute(
                "INSERT INTO insights (ts, content, category, source) VALUES (?1, ?2, ?3, ?4)",
                params![e.timestamp, e.content, e.category, e.source],
            )?;
        }
        tx.commit()?;
        Ok(rotated)
    }

    pub fn insights_count(&self) -> Result<usize, MetacogError> {
        let n: i64 = self.conn()?.query_row("SELECT COUNT(*) FROM insights", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    // --- dream audit ---

    pub fn dream_log_append(&self, entry: &DreamLogEntry) -> Result<(), MetacogError> {
        self.conn()?.execute(
            "INSERT INTO dream_log (archived_at, memories_processed, memories_archived, feedback_used, \
             previous_insights_used, insights, duration_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.archived_at,
                entry.memories_processed as i64,
                entry.memories_archived as i64,
                entry.feedback_used as i64,
                entry.previous_insights_used as i64,
                to_json(&entry.insights_generated),
                entry.duration_ms as i64,
            ],
        )?;
        Ok(())
    }

    pub fn dream_log_list(&self) -> Result<Vec<DreamLogEntry>, MetacogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT archived_at, memories_processed, memories_archived, feedback_used, \
             previous_insights_used, insights, duration_ms FROM dream_log ORDER BY seq ASC",
        )?;
        let entries = stmt.query_map([], row_to_dream_log)?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn dream_log_last(&self) -> Result<Option<DreamLogEntry>, MetacogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT archived_at, memories_processed, memories_archived, feedback_used, \
             previous_insights_used, insights, duration_ms FROM dream_log ORDER BY seq DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_dream_log(row)?)),
            None => Ok(None),
        }
    }

    // --- thought steps ---

    pub fn thought_append(
        &self,
        step: &str,
        thought: &str,
        memories_found: usize,
        extra: &Metadata,
    ) -> Result<ThoughtLogEntry, MetacogError> {
        let timestamp = Utc::now();
        self.conn()?.execute(
            "INSERT INTO thought_logs (ts, step, thought, memories_found, extra) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![timestamp, step, thought, memories_found as i64, to_json(extra)],
        )?;
        Ok(ThoughtLogEntry {
            timestamp,
            step: step.to_string(),
            thought: thought.to_string(),
            memories_found,
            extra: extra.clone(),
        })
    }

    /// Thought steps, oldest first. `limit` keeps the newest N.
    pub fn thought_list(&self, limit: Option<usize>) -> Result<Vec<ThoughtLogEntry>, MetacogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&tail_sql("thought_logs", "ts, step, thought, memories_found, extra", limit))?;
        let entries = stmt.query_map([], row_to_thought)?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Clear the logs `scope` covers in one transaction. The live index is
    /// not touched, so `memories_deleted` is always zero here.
    pub fn reset_logs(&self, scope: ResetScope) -> Result<ResetReport, MetacogError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut report = ResetReport {
            scope,
            insights_deleted: tx.execute("DELETE FROM insights", [])?,
            feedback_deleted: tx.execute("DELETE FROM feedback", [])?,
            thought_logs_deleted: tx.execute("DELETE FROM thought_logs", [])?,
            ..Default::default()
        };
        if scope == ResetScope::All {
            for table in ["memory_archive", "feedback_archived", "insights_archived"] {
                report.archived_deleted += tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            report.dream_log_deleted = tx.execute("DELETE FROM dream_log", [])?;
        }
        tx.commit()?;
        Ok(report)
    }
}
