//! Dream cycles: fold the live memories, pending feedback and the previous
//! insights into a fresh insight set with one generator call, then archive
//! everything that went in.
//!
//! A cycle is all-or-nothing up to the generator reply. Anything that goes
//! wrong before a usable reply (no generator, transport error, timeout,
//! error sentinel) returns `Failed` and leaves the store exactly as it was.

mod report;

pub use report::{DreamStats, ThresholdStatus};

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::ai::{is_error_sentinel, GenerateOptions, Generator};
use crate::category::Category;
use crate::config::DreamConfig;
use crate::db::{DreamLogEntry, InsightEntry, MetaValue, Metadata};
use crate::parser::{parse_entries, ParsedEntry};
use crate::prompts::{render_dream_prompt, template_is_complete, DREAM_PROMPT, DREAM_SYSTEM};
use crate::store::MemoryStore;
use crate::thresholds::FAILURE_DISPLAY_CHARS;
use crate::util::{take_chars, truncate_chars};

pub const INSIGHT_SOURCE: &str = "dreaming";

#[derive(Debug, Clone, Serialize)]
pub struct DreamReport {
    pub memories_processed: usize,
    pub memories_archived: usize,
    pub archive_failed: usize,
    pub feedback_used: usize,
    pub feedback_archived: usize,
    pub previous_insights_used: usize,
    pub insights_generated: usize,
    pub insights: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DreamOutcome {
    Completed(DreamReport),
    Skipped { reason: String },
    Failed { reason: String },
    Busy { reason: String },
}

impl DreamOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            DreamOutcome::Completed(_) => "completed",
            DreamOutcome::Skipped { .. } => "skipped",
            DreamOutcome::Failed { .. } => "failed",
            DreamOutcome::Busy { .. } => "busy",
        }
    }

    fn failed(reason: impl AsRef<str>) -> Self {
        let reason = truncate_chars(reason.as_ref(), FAILURE_DISPLAY_CHARS);
        error!(reason = %reason, "dream cycle failed");
        DreamOutcome::Failed { reason }
    }
}

/// What a parsed line contributes: stored text plus an optional tag.
fn insight_display(e: &ParsedEntry) -> String {
    match &e.category {
        Some(tag) => format!("[{tag}] {}", e.content),
        None => e.content.clone(),
    }
}

/// Parse a dream reply. Nothing parseable means the whole reply, cut to
/// `fallback_chars`, becomes the single insight.
pub fn insights_from_reply(reply: &str, fallback_chars: usize) -> Vec<ParsedEntry> {
    let parsed = parse_entries(reply);
    if !parsed.is_empty() {
        return parsed;
    }
    vec![ParsedEntry { category: None, content: take_chars(reply.trim(), fallback_chars) }]
}

pub struct DreamEngine {
    store: Arc<MemoryStore>,
    generator: Option<Arc<dyn Generator>>,
    cfg: DreamConfig,
    template: String,
    running: tokio::sync::Mutex<()>,
}

impl DreamEngine {
    pub fn new(store: Arc<MemoryStore>, generator: Option<Arc<dyn Generator>>, cfg: DreamConfig) -> Self {
        let template = match cfg.prompt_template.as_deref() {
            Some(t) if template_is_complete(t) => t.to_string(),
            Some(_) => {
                warn!("custom dream template lacks a placeholder, using built-in");
                DREAM_PROMPT.to_string()
            }
            None => DREAM_PROMPT.to_string(),
        };
        Self { store, generator, cfg, template, running: tokio::sync::Mutex::new(()) }
    }

    pub fn config(&self) -> &DreamConfig {
        &self.cfg
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Hold off dream cycles while the guard lives. `None` if a cycle is
    /// already running.
    pub fn exclusive(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.running.try_lock().ok()
    }

    /// Run one cycle. A second call while one is running returns `Busy`
    /// instead of queueing.
    pub async fn dream(&self) -> DreamOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            info!("dream cycle already running");
            return DreamOutcome::Busy { reason: "cycle already in progress".into() };
        };
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> DreamOutcome {
        let start = Instant::now();
        info!("dream cycle starting");

        let export = match self.store.export().await {
            Ok(e) => e,
            Err(e) => return DreamOutcome::failed(format!("export failed: {e}")),
        };
        if export.memories.is_empty() && export.feedback.is_empty() {
            info!("nothing to dream about");
            return DreamOutcome::Skipped { reason: "no memories or feedback".into() };
        }

        let Some(generator) = self.generator.as_ref() else {
            return DreamOutcome::failed("no generator configured");
        };

        let prompt = render_dream_prompt(&self.template, &export.feedback, &export.insights, &export.memories);
        info!(
            prompt_chars = prompt.chars().count(),
            feedback = export.feedback.len(),
            prev_insights = export.insights.len(),
            memories = export.memories.len(),
            "dream prompt built"
        );

        let opts = GenerateOptions { temperature: self.cfg.temperature, max_tokens: None };
        let reply = match tokio::time::timeout(self.cfg.timeout, generator.generate(&prompt, DREAM_SYSTEM, &opts)).await {
            Err(_) => {
                return DreamOutcome::failed(format!("generation timed out after {}s", self.cfg.timeout.as_secs()))
            }
            Ok(Err(e)) => return DreamOutcome::failed(format!("generator error: {e}")),
            Ok(Ok(r)) => r,
        };
        if is_error_sentinel(&reply) {
            let shown = if reply.trim().is_empty() { "empty reply" } else { reply.trim() };
            return DreamOutcome::failed(format!("generator error: {shown}"));
        }

        // Point of no return: the reply is good, persist and archive.
        let parsed = insights_from_reply(&reply, self.cfg.fallback_chars);
        let now = Utc::now();
        let mut entries = Vec::with_capacity(parsed.len());
        for p in &parsed {
            let mut meta = Metadata::new();
            meta.insert("source".into(), MetaValue::from(INSIGHT_SOURCE));
            if let Some(tag) = &p.category {
                meta.insert("tag".into(), MetaValue::from(tag.as_str()));
            }
            if let Err(e) = self.store.save_as(&p.content, Category::DreamInsight, meta).await {
                warn!(error = %e, "dream insight not saved to index");
            }
            entries.push(InsightEntry {
                timestamp: now,
                content: p.content.clone(),
                category: p.category.clone(),
                source: INSIGHT_SOURCE.into(),
            });
        }
        if let Err(e) = self.store.replace_insights(entries).await {
            error!(error = %e, "insight log rotation failed");
        }

        let ids: Vec<String> = export.memories.iter().map(|m| m.id.clone()).collect();
        let (memories_archived, archive_failed) = match self.store.archive(ids).await {
            Ok(r) => (r.archived_count, r.failed.len()),
            Err(e) => {
                error!(error = %e, "archiving dream input failed");
                (0, export.memories.len())
            }
        };

        let feedback_archived = match export.feedback.iter().map(|f| f.seq).max() {
            Some(max_seq) => self.store.archive_feedback_through(max_seq).await.unwrap_or_else(|e| {
                error!(error = %e, "feedback archive failed");
                0
            }),
            None => 0,
        };

        let insights: Vec<String> = parsed.iter().map(insight_display).collect();
        let duration_ms = start.elapsed().as_millis() as u64;
        let log = DreamLogEntry {
            archived_at: now,
            memories_processed: export.memories.len(),
            memories_archived,
            feedback_used: export.feedback.len(),
            previous_insights_used: export.insights.len(),
            insights_generated: insights.clone(),
            duration_ms,
        };
        if let Err(e) = self.store.append_dream_log(log).await {
            error!(error = %e, "dream audit write failed");
        }

        info!(
            insights = insights.len(),
            archived = memories_archived,
            feedback_archived,
            duration_ms,
            "dream cycle complete"
        );
        DreamOutcome::Completed(DreamReport {
            memories_processed: export.memories.len(),
            memories_archived,
            archive_failed,
            feedback_used: export.feedback.len(),
            feedback_archived,
            previous_insights_used: export.insights.len(),
            insights_generated: insights.len(),
            insights,
            duration_ms,
        })
    }

    /// Run a cycle only if the live count has reached the threshold.
    pub async fn dream_if_due(&self) -> Option<DreamOutcome> {
        let status = self.threshold().await;
        if !status.should_dream {
            return None;
        }
        info!(count = status.current_count, threshold = status.threshold, "dream threshold reached");
        Some(self.dream().await)
    }
}
