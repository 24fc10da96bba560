//! metacog: long-term memory and dream-cycle consolidation for a
//! conversational agent.

pub mod ai;
pub mod api;
pub mod category;
pub mod config;
pub mod db;
pub mod dream;
pub mod error;
pub mod index;
pub mod keywords;
pub mod parser;
pub mod prompts;
pub mod store;
pub mod thresholds;
pub mod turn;
pub mod util;

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub type SharedDB = Arc<db::MemoryDB>;

/// Run blocking work (SQLite, brute-force vector scans) on tokio's
/// blocking thread pool.
///
/// All synchronous MemoryDB / VectorIndex calls in async context MUST go
/// through this to avoid starving tokio worker threads.
pub async fn blocking<F, T>(f: F) -> Result<T, error::MetacogError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| error::MetacogError::Internal(e.to_string()))
}

/// Like [`blocking`], handing the closure a borrowed MemoryDB.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::MetacogError>
where
    F: FnOnce(&db::MemoryDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    blocking(move || f(&db)).await
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<store::MemoryStore>,
    pub dreamer: Arc<dream::DreamEngine>,
    pub api_key: Option<String>,
    /// Save the user side of every chat turn as an `exchange` memory.
    pub auto_save_exchange: bool,
    pub started_at: std::time::Instant,
}

/// LRU of query embeddings so repeated searches skip the embed call.
#[derive(Clone)]
pub struct EmbedCache {
    inner: Arc<parking_lot::Mutex<EmbedCacheInner>>,
}

struct EmbedCacheInner {
    cache: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

impl EmbedCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN.saturating_add(127));
        Self {
            inner: Arc::new(parking_lot::Mutex::new(EmbedCacheInner {
                cache: LruCache::new(cap),
                hits: 0,
                misses: 0,
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock();
        let val = inner.cache.get(key).cloned();
        if val.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        val
    }

    pub fn insert(&self, key: String, value: Vec<f32>) {
        self.inner.lock().cache.put(key, value);
    }

    pub fn clear(&self) {
        self.inner.lock().cache.clear();
    }

    /// (len, capacity, hits, misses)
    pub fn stats(&self) -> (usize, usize, u64, u64) {
        let inner = self.inner.lock();
        (inner.cache.len(), inner.cache.cap().get(), inner.hits, inner.misses)
    }
}
