//! SQLite persistence: the live memory index plus the append-only logs
//! (archive, feedback, insights, thought steps, dream audit).

mod index;
mod journal;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::category::Category;

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents SQLITE_BUSY when a dream cycle and the API write at once.
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Metadata values are deliberately limited to strings and numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        MetaValue::Int(n)
    }
}

pub type Metadata = BTreeMap<String, MetaValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub category: Category,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// A memory moved off the live index. Restorable until purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedMemory {
    #[serde(skip)]
    pub seq: i64,
    pub memory_id: String,
    pub content: String,
    pub category: Category,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedMemory {
    pub fn from_record(rec: MemoryRecord, archived_at: DateTime<Utc>) -> Self {
        Self {
            seq: 0,
            memory_id: rec.id,
            content: rec.content,
            category: rec.category,
            keywords: rec.keywords,
            metadata: rec.metadata,
            created_at: rec.created_at,
            archived_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    #[serde(skip)]
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub feedback: String,
    #[serde(default)]
    pub context: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub source: String,
}

/// One audit row per completed dream cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamLogEntry {
    pub archived_at: DateTime<Utc>,
    pub memories_processed: usize,
    pub memories_archived: usize,
    pub feedback_used: usize,
    pub previous_insights_used: usize,
    pub insights_generated: Vec<String>,
    pub duration_ms: u64,
}

/// One recorded reasoning step. `extra` holds caller-supplied fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtLogEntry {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub thought: String,
    #[serde(default)]
    pub memories_found: usize,
    #[serde(default)]
    pub extra: Metadata,
}

/// How much `reset_all` wipes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    /// Live index, insights, pending feedback and thought logs.
    #[default]
    Live,
    /// Everything `Live` clears plus every archive and the dream log.
    All,
}

/// What `reset_all` wiped.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ResetReport {
    pub scope: ResetScope,
    pub memories_deleted: usize,
    pub insights_deleted: usize,
    pub feedback_deleted: usize,
    pub thought_logs_deleted: usize,
    /// Memory, feedback and insight archive rows. Zero for `live`.
    pub archived_deleted: usize,
    pub dream_log_deleted: usize,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    category TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    embedding BLOB
);
CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);

CREATE TABLE IF NOT EXISTS memory_archive (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    archived_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS feedback (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    feedback TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS feedback_archived (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    feedback TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}',
    archived_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS insights (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT,
    source TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS insights_archived (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT,
    source TEXT NOT NULL,
    archived_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS thought_logs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    step TEXT NOT NULL,
    thought TEXT NOT NULL,
    memories_found INTEGER NOT NULL DEFAULT 0,
    extra TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS dream_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    archived_at TEXT NOT NULL,
    memories_processed INTEGER NOT NULL,
    memories_archived INTEGER NOT NULL,
    feedback_used INTEGER NOT NULL,
    previous_insights_used INTEGER NOT NULL,
    insights TEXT NOT NULL DEFAULT '[]',
    duration_ms INTEGER NOT NULL DEFAULT 0
);
"#;

/// SQLite-backed store for live records and logs.
pub struct MemoryDB {
    pool: Pool<SqliteConnectionManager>,
}

impl MemoryDB {
    fn conn(&self) -> Result<PooledConn, r2d2::Error> {
        self.pool.get()
    }

    /// Open (or create) a database at the given path.
    /// `:memory:` gives each caller its own shared-cache database so pooled
    /// connections agree on contents.
    pub fn open(path: &str) -> Result<Self, crate::error::MetacogError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);
        Ok(Self { pool })
    }
}

fn to_json<T: Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "null".into())
}

fn category_from_sql(raw: &str) -> Category {
    raw.parse().unwrap_or(Category::DEFAULT)
}

/// Column order: id, content, category, keywords, metadata, created_at
fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
    let category: String = row.get("category")?;
    let keywords: String = row.get("keywords")?;
    let metadata: String = row.get("metadata")?;
    Ok(MemoryRecord {
        id: row.get("id")?,
        content: row.get("content")?,
        category: category_from_sql(&category),
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get("created_at")?,
    })
}
