//! live → archived → live / gone transitions. Batches never fail as a
//! whole; each id or index reports its own outcome.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use super::MemoryStore;
use crate::blocking;
use crate::db::{ArchivedMemory, MemoryDB, MetaValue};
use crate::error::MetacogError;
use crate::index::VectorIndex;

#[derive(Debug, Clone, Serialize)]
pub struct FailedId {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedIndex {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveResult {
    pub archived_count: usize,
    pub failed: Vec<FailedId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreResult {
    pub restored_count: usize,
    /// New live ids, in request order.
    pub restored_ids: Vec<String>,
    pub failed: Vec<FailedIndex>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeResult {
    pub deleted_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteResult {
    pub deleted_count: usize,
    pub failed_count: usize,
}

/// Read → append to archive → delete from index. A failed delete takes the
/// archive entry back out so the record is never in both places.
fn archive_one(db: &MemoryDB, index: &dyn VectorIndex, id: &str) -> Result<(), String> {
    let rec = index
        .get(id)
        .map_err(|e| format!("index unavailable: {e}"))?
        .ok_or_else(|| "not found".to_string())?;
    let seq = db
        .archive_append(&ArchivedMemory::from_record(rec, Utc::now()))
        .map_err(|e| format!("archive write failed: {e}"))?;
    let removed = match index.delete(id) {
        Ok(true) => return Ok(()),
        Ok(false) => "record vanished before removal".to_string(),
        Err(e) => format!("index delete failed: {e}"),
    };
    if let Err(e) = db.archive_remove(seq) {
        warn!(id, seq, error = %e, "archive rollback failed");
    }
    Err(removed)
}

/// Resolve archive indices against a listing. Out-of-range and repeated
/// indices become failures; valid ones keep request order.
fn resolve_indices(
    indices: &[usize],
    listing: Vec<ArchivedMemory>,
) -> (Vec<(usize, ArchivedMemory)>, Vec<FailedIndex>) {
    let mut seen = HashSet::new();
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for &i in indices {
        if i >= listing.len() {
            failed.push(FailedIndex { index: i, reason: format!("out of range (archive has {})", listing.len()) });
        } else if !seen.insert(i) {
            failed.push(FailedIndex { index: i, reason: "duplicate index".into() });
        } else {
            ok.push((i, listing[i].clone()));
        }
    }
    (ok, failed)
}

impl MemoryStore {
    pub async fn archive(&self, ids: Vec<String>) -> Result<ArchiveResult, MetacogError> {
        let db = self.db.clone();
        let index = self.index.clone();
        let result = blocking(move || {
            let mut result = ArchiveResult::default();
            for id in ids {
                match archive_one(&db, index.as_ref(), &id) {
                    Ok(()) => result.archived_count += 1,
                    Err(reason) => result.failed.push(FailedId { id, reason }),
                }
            }
            result
        })
        .await?;
        if !result.failed.is_empty() {
            warn!(failed = result.failed.len(), "archive: some ids failed");
        }
        info!(archived = result.archived_count, "memories archived");
        Ok(result)
    }

    /// Archive entries, oldest first; the position is the index restore
    /// and purge take.
    pub async fn list_archive(&self) -> Result<Vec<ArchivedMemory>, MetacogError> {
        crate::db_call(&self.db, |db| db.archive_list()).await?
    }

    pub async fn archive_count(&self) -> Result<usize, MetacogError> {
        crate::db_call(&self.db, |db| db.archive_count()).await?
    }

    /// Re-save archived entries as new live records (new id, fresh keywords
    /// and embedding, `restored_from` metadata), then drop them from the
    /// archive.
    pub async fn restore(&self, indices: &[usize]) -> Result<RestoreResult, MetacogError> {
        let listing = self.list_archive().await?;
        let (valid, failed) = resolve_indices(indices, listing);
        let mut result = RestoreResult { failed, ..Default::default() };

        for (i, entry) in valid {
            let mut metadata = entry.metadata.clone();
            metadata.insert("restored_from".into(), MetaValue::from(entry.memory_id.as_str()));
            let rec = match self.save_strict(&entry.content, entry.category, metadata).await {
                Ok(rec) => rec,
                Err(e) => {
                    result.failed.push(FailedIndex { index: i, reason: e.to_string() });
                    continue;
                }
            };
            let seq = entry.seq;
            let removed = crate::db_call(&self.db, move |db| db.archive_remove(seq)).await?;
            if matches!(removed, Ok(true)) {
                result.restored_count += 1;
                result.restored_ids.push(rec.id);
                continue;
            }
            // archive entry is stuck; undo the re-save
            let index = self.index.clone();
            let new_id = rec.id.clone();
            match blocking(move || index.delete(&new_id)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(id = %rec.id, error = %e, "restore rollback failed"),
                Err(e) => warn!(id = %rec.id, error = %e, "restore rollback failed"),
            }
            result.failed.push(FailedIndex { index: i, reason: "archive entry could not be removed".into() });
        }

        info!(restored = result.restored_count, failed = result.failed.len(), "archive restore");
        Ok(result)
    }

    /// Permanently drop archive entries.
    pub async fn purge(&self, indices: &[usize]) -> Result<PurgeResult, MetacogError> {
        let listing = self.list_archive().await?;
        let (valid, _) = resolve_indices(indices, listing);
        let seqs: Vec<i64> = valid.iter().map(|(_, e)| e.seq).collect();
        let deleted_count = crate::db_call(&self.db, move |db| {
            let mut n = 0usize;
            for seq in seqs {
                match db.archive_remove(seq) {
                    Ok(true) => n += 1,
                    Ok(false) => {}
                    Err(e) => warn!(seq, error = %e, "purge failed"),
                }
            }
            n
        })
        .await?;
        info!(deleted = deleted_count, "archive purged");
        Ok(PurgeResult { deleted_count })
    }

    /// Remove live records outright, skipping the archive.
    pub async fn batch_delete(&self, ids: Vec<String>) -> Result<DeleteResult, MetacogError> {
        let index = self.index.clone();
        let result = blocking(move || {
            let mut r = DeleteResult::default();
            for id in &ids {
                match index.delete(id) {
                    Ok(true) => r.deleted_count += 1,
                    Ok(false) => r.failed_count += 1,
                    Err(e) => {
                        warn!(id = %id, error = %e, "delete failed");
                        r.failed_count += 1;
                    }
                }
            }
            r
        })
        .await?;
        info!(deleted = result.deleted_count, failed = result.failed_count, "batch delete");
        Ok(result)
    }
}
