use async_trait::async_trait;
use metacog::ai::{cosine_similarity, Embedder, Framing};
use metacog::category::Category;
use metacog::config::SearchConfig;
use metacog::db::{MemoryDB, MemoryRecord, MetaValue};
use metacog::error::{CollaboratorError, MetacogError};
use metacog::index::{IndexFilter, Neighbor, VectorIndex};
use metacog::store::{MatchType, MemoryStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Character-bigram hashing into a small dense vector. Texts that share
/// substrings end up close.
struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str, _framing: Framing) -> Result<Vec<f32>, CollaboratorError> {
        let chars: Vec<char> = text.chars().collect();
        let mut v = vec![0f32; 64];
        for w in chars.windows(2) {
            let h = (w[0] as u32).wrapping_mul(31).wrapping_add(w[1] as u32);
            v[(h % 64) as usize] += 1.0;
        }
        Ok(v)
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _text: &str, _framing: Framing) -> Result<Vec<f32>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("connection refused".into()))
    }
}

/// SQLite index whose upserts or deletes can be switched off.
struct FlakyIndex {
    inner: Arc<MemoryDB>,
    upserts_fail: AtomicBool,
    deletes_fail: AtomicBool,
}

impl FlakyIndex {
    fn over(inner: Arc<MemoryDB>) -> Arc<Self> {
        Arc::new(Self { inner, upserts_fail: AtomicBool::new(false), deletes_fail: AtomicBool::new(false) })
    }
}

impl VectorIndex for FlakyIndex {
    fn upsert(&self, record: &MemoryRecord, embedding: Option<&[f32]>) -> Result<(), CollaboratorError> {
        if self.upserts_fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("upsert refused".into()));
        }
        self.inner.upsert(record, embedding)
    }
    fn query(&self, embedding: &[f32], k: usize, filter: &IndexFilter) -> Result<Vec<Neighbor>, CollaboratorError> {
        self.inner.query(embedding, k, filter)
    }
    fn get(&self, id: &str) -> Result<Option<MemoryRecord>, CollaboratorError> {
        self.inner.get(id)
    }
    fn list(&self, filter: &IndexFilter, limit: Option<usize>) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        self.inner.list(filter, limit)
    }
    fn scan(&self, needles: &[String], filter: &IndexFilter, limit: usize) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        self.inner.scan(needles, filter, limit)
    }
    fn count(&self, category: Option<Category>) -> Result<usize, CollaboratorError> {
        self.inner.count(category)
    }
    fn delete(&self, id: &str) -> Result<bool, CollaboratorError> {
        if self.deletes_fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("delete refused".into()));
        }
        self.inner.delete(id)
    }
    fn clear(&self) -> Result<usize, CollaboratorError> {
        self.inner.clear()
    }
}

/// Index that is down for everything.
struct DeadIndex;

impl VectorIndex for DeadIndex {
    fn upsert(&self, _: &MemoryRecord, _: Option<&[f32]>) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Unavailable("down".into()))
    }
    fn query(&self, _: &[f32], _: usize, _: &IndexFilter) -> Result<Vec<Neighbor>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("down".into()))
    }
    fn get(&self, _: &str) -> Result<Option<MemoryRecord>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("down".into()))
    }
    fn list(&self, _: &IndexFilter, _: Option<usize>) -> Result<Vec<MemoryRecord>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("down".into()))
    }
    fn count(&self, _: Option<Category>) -> Result<usize, CollaboratorError> {
        Err(CollaboratorError::Unavailable("down".into()))
    }
    fn delete(&self, _: &str) -> Result<bool, CollaboratorError> {
        Err(CollaboratorError::Unavailable("down".into()))
    }
    fn clear(&self) -> Result<usize, CollaboratorError> {
        Err(CollaboratorError::Unavailable("down".into()))
    }
}

fn db() -> Arc<MemoryDB> {
    Arc::new(MemoryDB::open(":memory:").unwrap())
}

fn plain_store() -> MemoryStore {
    MemoryStore::sqlite(db(), None, SearchConfig::default())
}

fn embedded_store() -> MemoryStore {
    MemoryStore::sqlite(db(), Some(Arc::new(HashEmbedder)), SearchConfig::default())
}

async fn save_cake_trio(s: &MemoryStore) -> (String, String, String) {
    let a = s.save("ユーザーの好きな食べ物はケーキ", Some("chat-origin"), None).await.unwrap();
    let b = s.save("天気について話した", Some("chat-origin"), None).await.unwrap();
    let c = s.save("ケーキのレシピを教えた", Some("chat-origin"), None).await.unwrap();
    (a, b, c)
}

// --- Search ---

#[tokio::test]
async fn cake_ranks_above_weather_lexically() {
    let s = plain_store();
    let (a, weather, c) = save_cake_trio(&s).await;
    let hits = s.search("ケーキ", 5, None).await;
    assert!(hits.len() >= 2);
    let top: Vec<&str> = hits.iter().take(2).map(|h| h.id.as_str()).collect();
    assert!(top.contains(&a.as_str()) && top.contains(&c.as_str()));
    assert!(hits.iter().all(|h| h.id != weather));
    assert!(hits.iter().all(|h| h.match_type == MatchType::Keyword));
}

#[tokio::test]
async fn cake_ranks_above_weather_with_embedder() {
    let s = embedded_store();
    let (a, weather, c) = save_cake_trio(&s).await;
    let hits = s.search("ケーキ", 5, None).await;
    let pos = |id: &str| hits.iter().position(|h| h.id == id);
    let (pa, pc) = (pos(&a).unwrap(), pos(&c).unwrap());
    if let Some(pw) = pos(&weather) {
        assert!(pa < pw && pc < pw);
    }
    // lexical content match outranks any semantic score for these
    assert_eq!(hits[0].relevance, 0.9);
}

#[tokio::test]
async fn results_are_sorted_and_unique() {
    let s = embedded_store();
    save_cake_trio(&s).await;
    s.save("ケーキ屋の場所", None, None).await.unwrap();
    let hits = s.search("ケーキ", 10, None).await;
    for w in hits.windows(2) {
        assert!(w[0].relevance >= w[1].relevance);
    }
    let mut ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), hits.len());
}

#[tokio::test]
async fn insight_hidden_from_general_search() {
    let s = plain_store();
    s.save("ケーキの話は短めに", Some("insight"), None).await.unwrap();
    s.save("ケーキを焼いた", Some("chat"), None).await.unwrap();
    let general = s.search("ケーキ", 5, None).await;
    assert_eq!(general.len(), 1);
    assert_eq!(general[0].category, Category::Chat);
    let scoped = s.search("ケーキ", 5, Some(Category::Insight)).await;
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].category, Category::Insight);
}

#[tokio::test]
async fn empty_query_with_category_lists_that_category() {
    let s = plain_store();
    s.save("one", Some("chat"), None).await.unwrap();
    s.save("two", Some("voluntary"), None).await.unwrap();
    let hits = s.search("  ", 5, Some(Category::Chat)).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].match_type, MatchType::CategoryFilter);
    assert_eq!(hits[0].relevance, 0.8);
    assert!(s.search("", 5, None).await.is_empty());
}

#[tokio::test]
async fn limit_zero_returns_nothing() {
    let s = plain_store();
    save_cake_trio(&s).await;
    assert!(s.search("ケーキ", 0, None).await.is_empty());
}

#[tokio::test]
async fn newest_record_found_past_scan_limit() {
    let cfg = SearchConfig { scan_limit: 5, ..SearchConfig::default() };
    let s = MemoryStore::sqlite(db(), None, cfg);
    for i in 0..20 {
        s.save(&format!("filler memo {i}"), Some("chat"), None).await.unwrap();
    }
    let id = s.save("ユーザーはモンブランが好き", Some("chat"), None).await.unwrap();
    assert_eq!(s.count(None).await, 21);

    let hits = s.search("モンブラン", 5, None).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    assert_eq!(hits[0].relevance, 0.9);
}

#[tokio::test]
async fn many_matches_prefer_the_newest() {
    let cfg = SearchConfig { scan_limit: 3, ..SearchConfig::default() };
    let s = MemoryStore::sqlite(db(), None, cfg);
    let mut ids = vec![];
    for i in 0..10 {
        ids.push(s.save(&format!("ケーキ {i} 個目"), None, None).await.unwrap());
    }
    let hits = s.search("ケーキ", 10, None).await;
    let got: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    let want: Vec<&str> = ids.iter().rev().take(3).map(String::as_str).collect();
    assert_eq!(got, want);
}

#[tokio::test]
async fn query_embeddings_are_cached() {
    let s = embedded_store();
    save_cake_trio(&s).await;
    s.search("ケーキ", 5, None).await;
    s.search("ケーキ", 5, None).await;
    let (len, _, hits, misses) = s.embed_cache().stats();
    assert_eq!(len, 1);
    assert_eq!((hits, misses), (1, 1));
}

#[tokio::test]
async fn embedder_outage_degrades_to_lexical() {
    let s = MemoryStore::sqlite(db(), Some(Arc::new(DownEmbedder)), SearchConfig::default());
    let id = s.save("ケーキのレシピを教えた", None, None).await.unwrap();
    let hits = s.search("ケーキ", 5, None).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
}

#[tokio::test]
async fn hash_embedder_is_sane() {
    let e = HashEmbedder;
    let a = e.embed("ケーキが好き", Framing::Passage).await.unwrap();
    let b = e.embed("ケーキが好き", Framing::Query).await.unwrap();
    assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
}

// --- Counting ---

#[tokio::test]
async fn count_tracks_saves_archives_and_restores() {
    let s = plain_store();
    let mut ids = vec![];
    for i in 0..4 {
        ids.push(s.save(&format!("memo number {i}"), Some("chat"), None).await.unwrap());
    }
    s.save("keep me", Some("voluntary"), None).await.unwrap();
    assert_eq!(s.count(None).await, 5);
    assert_eq!(s.count(Some(Category::Chat)).await, 4);

    s.archive(ids[..2].to_vec()).await.unwrap();
    assert_eq!(s.count(None).await, 3);
    assert_eq!(s.archive_count().await.unwrap(), 2);

    s.restore(&[0]).await.unwrap();
    assert_eq!(s.count(None).await, 4);
    assert_eq!(s.archive_count().await.unwrap(), 1);
}

// --- Archive lifecycle ---

#[tokio::test]
async fn archive_then_restore_round_trip() {
    let s = plain_store();
    let mut meta = metacog::db::Metadata::new();
    meta.insert("mood".into(), MetaValue::from("good"));
    let id = s.save("ケーキのレシピを教えた", Some("chat"), Some(meta)).await.unwrap();

    let r = s.archive(vec![id.clone()]).await.unwrap();
    assert_eq!(r.archived_count, 1);
    assert!(s.get(&id).await.unwrap().is_none());

    let listing = s.list_archive().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].memory_id, id);

    let r = s.restore(&[0]).await.unwrap();
    assert_eq!(r.restored_count, 1);
    let new_id = &r.restored_ids[0];
    assert_ne!(new_id, &id);
    let rec = s.get(new_id).await.unwrap().unwrap();
    assert_eq!(rec.content, "ケーキのレシピを教えた");
    assert_eq!(rec.category, Category::Chat);
    assert_eq!(rec.metadata.get("restored_from"), Some(&MetaValue::from(id.as_str())));
    assert_eq!(rec.metadata.get("mood"), Some(&MetaValue::from("good")));
    assert!(s.list_archive().await.unwrap().is_empty());
}

#[tokio::test]
async fn archive_reports_unknown_ids() {
    let s = plain_store();
    let id = s.save("real", None, None).await.unwrap();
    let r = s.archive(vec![id, "voluntary_nope".into()]).await.unwrap();
    assert_eq!(r.archived_count, 1);
    assert_eq!(r.failed.len(), 1);
    assert_eq!(r.failed[0].id, "voluntary_nope");
}

#[tokio::test]
async fn restore_bad_indices_are_reported() {
    let s = plain_store();
    let id = s.save("real", None, None).await.unwrap();
    s.archive(vec![id]).await.unwrap();
    let r = s.restore(&[0, 0, 7]).await.unwrap();
    assert_eq!(r.restored_count, 1);
    let bad: Vec<usize> = r.failed.iter().map(|f| f.index).collect();
    assert_eq!(bad, vec![0, 7]);
}

#[tokio::test]
async fn purge_drops_archive_entries() {
    let s = plain_store();
    let a = s.save("first", None, None).await.unwrap();
    let b = s.save("second", None, None).await.unwrap();
    s.archive(vec![a, b]).await.unwrap();
    let r = s.purge(&[1, 5]).await.unwrap();
    assert_eq!(r.deleted_count, 1);
    let left = s.list_archive().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].content, "first");
}

#[tokio::test]
async fn failed_index_delete_rolls_archive_back() {
    let inner = db();
    let flaky = FlakyIndex::over(inner.clone());
    let s = MemoryStore::new(inner, flaky.clone(), None, SearchConfig::default());
    let id = s.save("stay live", None, None).await.unwrap();

    flaky.deletes_fail.store(true, Ordering::SeqCst);
    let r = s.archive(vec![id.clone()]).await.unwrap();
    assert_eq!(r.archived_count, 0);
    assert_eq!(r.failed.len(), 1);
    // still live, not duplicated into the archive
    assert!(s.get(&id).await.unwrap().is_some());
    assert_eq!(s.archive_count().await.unwrap(), 0);
}

// --- Batch delete ---

#[tokio::test]
async fn batch_delete_counts_unknown_ids_as_failed() {
    let s = plain_store();
    let a = s.save("alpha", None, None).await.unwrap();
    let b = s.save("beta", None, None).await.unwrap();
    let r = s.batch_delete(vec![a, "chat_missing".into(), b]).await.unwrap();
    assert_eq!(r.deleted_count, 2);
    assert_eq!(r.failed_count, 1);
    assert_eq!(s.count(None).await, 0);
    assert_eq!(s.archive_count().await.unwrap(), 0);
}

// --- Collaborator outages ---

#[tokio::test]
async fn dead_index_degrades_saves_and_reads() {
    let s = MemoryStore::new(db(), Arc::new(DeadIndex), None, SearchConfig::default());
    let id = s.save("anything", None, None).await.unwrap();
    assert!(id.starts_with("voluntary_"));
    assert!(matches!(s.save("  ", None, None).await, Err(MetacogError::EmptyContent)));
    assert_eq!(s.count(None).await, 0);
    assert!(s.list(None, None).await.is_empty());
    assert!(s.search("anything", 5, None).await.is_empty());
}

#[tokio::test]
async fn restore_during_upsert_outage_keeps_archive_entry() {
    let inner = db();
    let flaky = FlakyIndex::over(inner.clone());
    let s = MemoryStore::new(inner, flaky.clone(), None, SearchConfig::default());
    let id = s.save("ケーキのレシピを教えた", None, None).await.unwrap();
    s.archive(vec![id]).await.unwrap();

    flaky.upserts_fail.store(true, Ordering::SeqCst);
    let r = s.restore(&[0]).await.unwrap();
    assert_eq!(r.restored_count, 0);
    assert_eq!(r.failed.len(), 1);
    assert_eq!(s.archive_count().await.unwrap(), 1);

    flaky.upserts_fail.store(false, Ordering::SeqCst);
    let r = s.restore(&[0]).await.unwrap();
    assert_eq!(r.restored_count, 1);
    assert_eq!(s.count(None).await, 1);
}

// --- Export ---

#[tokio::test]
async fn export_snapshots_everything() {
    let s = plain_store();
    save_cake_trio(&s).await;
    s.save_feedback("もっと短く", Default::default()).await.unwrap();
    let e = s.export().await.unwrap();
    assert_eq!(e.memories.len(), 3);
    assert_eq!(e.feedback.len(), 1);
    assert!(e.insights.is_empty());
}
