//! Live index: records plus embedding blobs, brute-force cosine search.

use rusqlite::{params, params_from_iter};

use super::*;
use crate::ai::{bytes_to_embedding, cosine_similarity, embedding_to_bytes};
use crate::error::CollaboratorError;
use crate::index::{IndexFilter, Neighbor, VectorIndex};

const RECORD_COLS: &str = "id, content, category, keywords, metadata, created_at";

/// WHERE clause and bound values for a filter. Always returns a clause so
/// callers can append `AND ...`.
fn filter_clause(filter: &IndexFilter) -> (String, Vec<String>) {
    let mut clauses = vec!["1=1".to_string()];
    let mut values = Vec::new();
    if let Some(c) = filter.category {
        values.push(c.as_str().to_string());
        clauses.push(format!("category = ?{}", values.len()));
    }
    for c in &filter.exclude {
        values.push(c.as_str().to_string());
        clauses.push(format!("category != ?{}", values.len()));
    }
    (clauses.join(" AND "), values)
}

/// Make `%`, `_` and `\` literal inside a LIKE pattern (paired with `ESCAPE '\'`).
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl VectorIndex for MemoryDB {
    fn upsert(&self, record: &MemoryRecord, embedding: Option<&[f32]>) -> Result<(), CollaboratorError> {
        let blob = embedding.map(embedding_to_bytes);
        self.conn()?.execute(
            "INSERT OR REPLACE INTO memories (id, content, category, keywords, metadata, created_at, embedding) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.content,
                record.category.as_str(),
                to_json(&record.keywords),
                to_json(&record.metadata),
                record.created_at,
                blob,
            ],
        )?;
        Ok(())
    }

    fn query(&self, embedding: &[f32], k: usize, filter: &IndexFilter) -> Result<Vec<Neighbor>, CollaboratorError> {
        if k == 0 {
            return Ok(vec![]);
        }
        let (clause, values) = filter_clause(filter);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLS}, embedding FROM memories WHERE embedding IS NOT NULL AND {clause}"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let rec = row_to_record(row)?;
            let blob: Vec<u8> = row.get("embedding")?;
            Ok((rec, blob))
        })?;

        let mut hits: Vec<Neighbor> = Vec::new();
        for row in rows {
            let (record, blob) = row?;
            let sim = cosine_similarity(embedding, &bytes_to_embedding(&blob));
            hits.push(Neighbor { record, distance: 1.0 - sim });
        }
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn get(&self, id: &str) -> Result<Option<MemoryRecord>, CollaboratorError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {RECORD_COLS} FROM memories WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    fn list(&self, filter: &IndexFilter, limit: Option<usize>) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        let (clause, values) = filter_clause(filter);
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map_or(-1, |l| l as i64);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLS} FROM memories WHERE {clause} ORDER BY rowid LIMIT {limit}"
        ))?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn scan(&self, needles: &[String], filter: &IndexFilter, limit: usize) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        let needles: Vec<&str> = needles.iter().map(|n| n.trim()).filter(|n| !n.is_empty()).collect();
        if needles.is_empty() || limit == 0 {
            return Ok(vec![]);
        }
        let (clause, mut values) = filter_clause(filter);
        let mut any = Vec::with_capacity(needles.len());
        for n in needles {
            values.push(format!("%{}%", like_escape(n)));
            let i = values.len();
            any.push(format!("content LIKE ?{i} ESCAPE '\\' OR keywords LIKE ?{i} ESCAPE '\\'"));
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLS} FROM memories WHERE {clause} AND ({}) ORDER BY rowid DESC LIMIT {limit}",
            any.join(" OR ")
        ))?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count(&self, category: Option<Category>) -> Result<usize, CollaboratorError> {
        let conn = self.conn()?;
        let n: i64 = match category {
            Some(c) => conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE category = ?1",
                params![c.as_str()],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?,
        };
        Ok(n as usize)
    }

    fn delete(&self, id: &str) -> Result<bool, CollaboratorError> {
        let n = self.conn()?.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn clear(&self) -> Result<usize, CollaboratorError> {
        let n = self.conn()?.execute("DELETE FROM memories", [])?;
        Ok(n)
    }
}
