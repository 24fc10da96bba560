use async_trait::async_trait;
use metacog::ai::{GenerateOptions, Generator};
use metacog::category::Category;
use metacog::config::{DreamConfig, SearchConfig};
use metacog::db::{MemoryDB, Metadata};
use metacog::dream::{DreamEngine, DreamOutcome};
use metacog::error::CollaboratorError;
use metacog::store::MemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replies with a fixed result and remembers the last prompt.
struct Scripted {
    reply: Result<String, String>,
    delay: Duration,
    calls: AtomicUsize,
    last_prompt: Mutex<String>,
}

impl Scripted {
    fn ok(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(String::new()),
        })
    }

    fn err(msg: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(msg.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(String::new()),
        })
    }

    fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.into()),
            delay,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(String::new()),
        })
    }
}

#[async_trait]
impl Generator for Scripted {
    async fn generate(&self, prompt: &str, _system: &str, _opts: &GenerateOptions) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = prompt.to_string();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(CollaboratorError::Backend)
    }
}

const GOOD_REPLY: &str = "## 今回の振り返り\n\
### A. 応答スタイル\n\
A1. 結論から先に話すようにする\n\
A2. 専門用語には短い説明を添える\n\
### B. ユーザー理解\n\
B1. ユーザーは甘いものが好き\n";

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::sqlite(
        Arc::new(MemoryDB::open(":memory:").unwrap()),
        None,
        SearchConfig::default(),
    ))
}

fn engine(store: Arc<MemoryStore>, generator: Option<Arc<Scripted>>, cfg: DreamConfig) -> DreamEngine {
    let generator = generator.map(|g| g as Arc<dyn Generator>);
    DreamEngine::new(store, generator, cfg)
}

async fn seed(s: &MemoryStore) {
    s.save("ユーザーの好きな食べ物はケーキ", Some("chat"), None).await.unwrap();
    s.save("天気について話した", Some("chat"), None).await.unwrap();
    s.save("ケーキのレシピを教えた", Some("voluntary"), None).await.unwrap();
    s.save_feedback("説明が長すぎる", Metadata::new()).await.unwrap();
}

#[tokio::test]
async fn empty_store_is_skipped() {
    let s = store();
    let gen = Scripted::ok(GOOD_REPLY);
    let e = engine(s.clone(), Some(gen.clone()), DreamConfig::default());
    let out = e.dream().await;
    assert_eq!(out.status(), "skipped");
    assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
    assert!(s.dream_history().await.unwrap().is_empty());
    assert_eq!(s.archive_count().await.unwrap(), 0);
}

#[tokio::test]
async fn sentinel_reply_fails_without_side_effects() {
    let s = store();
    seed(&s).await;
    let before = s.export().await.unwrap();
    let e = engine(s.clone(), Some(Scripted::ok("API Error")), DreamConfig::default());

    let out = e.dream().await;
    assert_eq!(out.status(), "failed");

    let after = s.export().await.unwrap();
    assert_eq!(after.memories.len(), before.memories.len());
    assert_eq!(after.feedback.len(), before.feedback.len());
    assert_eq!(s.archive_count().await.unwrap(), 0);
    assert!(s.dream_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn generator_error_fails_without_side_effects() {
    let s = store();
    seed(&s).await;
    let e = engine(s.clone(), Some(Scripted::err("503 from upstream")), DreamConfig::default());
    match e.dream().await {
        DreamOutcome::Failed { reason } => assert!(reason.contains("503")),
        other => panic!("expected failure, got {}", other.status()),
    }
    assert_eq!(s.count(None).await, 3);
    assert_eq!(s.list_feedback(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn timeout_fails_without_side_effects() {
    let s = store();
    seed(&s).await;
    let cfg = DreamConfig { timeout: Duration::from_millis(20), ..DreamConfig::default() };
    let e = engine(s.clone(), Some(Scripted::slow(GOOD_REPLY, Duration::from_secs(5))), cfg);
    assert_eq!(e.dream().await.status(), "failed");
    assert_eq!(s.count(None).await, 3);
    assert_eq!(s.archive_count().await.unwrap(), 0);
}

#[tokio::test]
async fn missing_generator_fails() {
    let s = store();
    seed(&s).await;
    let e = engine(s.clone(), None, DreamConfig::default());
    assert_eq!(e.dream().await.status(), "failed");
    assert_eq!(s.count(None).await, 3);
}

#[tokio::test]
async fn completed_cycle_archives_inputs_and_keeps_insights() {
    let s = store();
    seed(&s).await;
    let gen = Scripted::ok(GOOD_REPLY);
    let e = engine(s.clone(), Some(gen.clone()), DreamConfig::default());

    let report = match e.dream().await {
        DreamOutcome::Completed(r) => r,
        other => panic!("expected completion, got {}", other.status()),
    };
    assert_eq!(report.memories_processed, 3);
    assert_eq!(report.memories_archived, 3);
    assert_eq!(report.feedback_used, 1);
    assert_eq!(report.feedback_archived, 1);
    assert_eq!(report.insights_generated, 3);
    assert_eq!(report.insights[0], "[A] 結論から先に話すようにする");

    // prompt carried all three sections
    let prompt = gen.last_prompt.lock().unwrap().clone();
    assert!(prompt.contains("- 説明が長すぎる"));
    assert!(prompt.contains("- [chat] 天気について話した"));

    // only the new dream insights are live
    assert_eq!(s.count(None).await, 3);
    assert_eq!(s.count(Some(Category::DreamInsight)).await, 3);
    assert_eq!(s.archive_count().await.unwrap(), 3);
    assert!(s.list_feedback(None).await.unwrap().is_empty());

    let insights = s.list_insights(None).await.unwrap();
    assert_eq!(insights.len(), 3);
    assert_eq!(insights[0].category.as_deref(), Some("A"));
    assert_eq!(insights[0].source, "dreaming");

    let history = s.dream_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].memories_archived, 3);
}

#[tokio::test]
async fn second_cycle_feeds_previous_insights() {
    let s = store();
    seed(&s).await;
    let gen = Scripted::ok(GOOD_REPLY);
    let e = engine(s.clone(), Some(gen.clone()), DreamConfig::default());
    e.dream().await;

    s.save("新しい話題", None, None).await.unwrap();
    match e.dream().await {
        DreamOutcome::Completed(r) => {
            assert_eq!(r.previous_insights_used, 3);
            assert_eq!(r.feedback_used, 0);
        }
        other => panic!("expected completion, got {}", other.status()),
    }
    assert!(gen.last_prompt.lock().unwrap().contains("[A] 結論から先に話すようにする"));
    // replaced, not appended
    assert_eq!(s.insight_count().await.unwrap(), 3);
}

#[tokio::test]
async fn unstructured_reply_becomes_single_insight() {
    let s = store();
    seed(&s).await;
    let cfg = DreamConfig { fallback_chars: 10, ..DreamConfig::default() };
    let e = engine(s.clone(), Some(Scripted::ok("とくに大きな変化はなかったと思います。")), cfg);
    match e.dream().await {
        DreamOutcome::Completed(r) => {
            assert_eq!(r.insights_generated, 1);
            assert_eq!(r.insights[0].chars().count(), 10);
        }
        other => panic!("expected completion, got {}", other.status()),
    }
}

#[tokio::test]
async fn concurrent_trigger_is_busy() {
    let s = store();
    seed(&s).await;
    let e = Arc::new(engine(s.clone(), Some(Scripted::slow(GOOD_REPLY, Duration::from_millis(300))), DreamConfig::default()));

    let first = {
        let e = e.clone();
        tokio::spawn(async move { e.dream().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(e.is_running());
    assert_eq!(e.dream().await.status(), "busy");
    assert_eq!(first.await.unwrap().status(), "completed");
    assert!(!e.is_running());
}

#[tokio::test]
async fn memories_saved_mid_cycle_stay_live() {
    let s = store();
    seed(&s).await;
    let e = Arc::new(engine(s.clone(), Some(Scripted::slow(GOOD_REPLY, Duration::from_millis(200))), DreamConfig::default()));

    let run = {
        let e = e.clone();
        tokio::spawn(async move { e.dream().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let late = s.save("途中で届いた記憶", None, None).await.unwrap();
    s.save_feedback("途中で届いた意見", Metadata::new()).await.unwrap();
    assert_eq!(run.await.unwrap().status(), "completed");

    assert!(s.get(&late).await.unwrap().is_some());
    let pending = s.list_feedback(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].feedback, "途中で届いた意見");
}

#[tokio::test]
async fn threshold_and_stats() {
    let s = store();
    seed(&s).await;
    let cfg = DreamConfig { memory_threshold: 3, ..DreamConfig::default() };
    let e = engine(s.clone(), Some(Scripted::ok(GOOD_REPLY)), cfg);

    let t = e.threshold().await;
    assert_eq!((t.current_count, t.threshold, t.should_dream), (3, 3, true));

    assert!(e.dream_if_due().await.is_some());
    let stats = e.stats().await.unwrap();
    assert_eq!(stats.dream_cycles, 1);
    assert_eq!(stats.total_archived_memories, 3);
    assert_eq!(stats.archive_size, 3);
    assert_eq!(stats.pending_feedback, 0);
    assert_eq!(stats.total_insights, 3);
    assert!(stats.last_dream.is_some());

    let report = e.last_report().await.unwrap().unwrap();
    assert!(report.starts_with("# Dream Report"));
    assert!(report.contains("1. [A] 結論から先に話すようにする"));
}

#[tokio::test]
async fn below_threshold_is_not_due() {
    let s = store();
    s.save("only one", None, None).await.unwrap();
    let e = engine(s, Some(Scripted::ok(GOOD_REPLY)), DreamConfig::default());
    assert!(e.dream_if_due().await.is_none());
    assert!(e.last_report().await.unwrap().is_none());
}
