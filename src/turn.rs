//! Chat-turn ingestion: the caller ran the model, we file what it produced.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::category::Category;
use crate::db::{InsightEntry, MetaValue, Metadata};
use crate::error::MetacogError;
use crate::parser::{parse_response, ParsedEntry};
use crate::store::MemoryStore;

pub const EXCHANGE_PREFIX: &str = "[対話] ";
pub const CHAT_INSIGHT_SOURCE: &str = "chat";

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// Reply text with `[SAVE]` lines and the insight section removed.
    pub response: String,
    pub saves: Vec<String>,
    pub insights: Vec<ParsedEntry>,
    pub saved_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
}

/// Parse an assistant reply and persist its side products: `[SAVE]` items
/// as `chat`, insight-section entries as `insight` records plus insight-log
/// entries for the next dream cycle, and (optionally) the
/// user's input as an `exchange`. Individual save failures are logged and
/// skipped; only an empty user input is an error.
pub async fn record_turn(
    store: &MemoryStore,
    user_input: &str,
    raw_response: &str,
    auto_save_exchange: bool,
) -> Result<TurnOutcome, MetacogError> {
    let user_input = user_input.trim();
    if user_input.is_empty() {
        return Err(MetacogError::Validation("user_input must not be empty".into()));
    }

    let parsed = parse_response(raw_response);
    let mut saved_ids = Vec::new();

    for item in &parsed.saves {
        match store.save_as(item, Category::Chat, Metadata::new()).await {
            Ok(rec) => saved_ids.push(rec.id),
            Err(e) => warn!(error = %e, "chat save skipped"),
        }
    }

    for entry in &parsed.insights {
        let mut meta = Metadata::new();
        meta.insert("source".into(), MetaValue::from(CHAT_INSIGHT_SOURCE));
        if let Some(tag) = &entry.category {
            meta.insert("tag".into(), MetaValue::from(tag.as_str()));
        }
        match store.save_as(&entry.content, Category::Insight, meta).await {
            Ok(rec) => saved_ids.push(rec.id),
            Err(e) => {
                warn!(error = %e, "insight save skipped");
                continue;
            }
        }
        let logged = InsightEntry {
            timestamp: Utc::now(),
            content: entry.content.clone(),
            category: entry.category.clone(),
            source: CHAT_INSIGHT_SOURCE.into(),
        };
        if let Err(e) = store.append_insight(logged).await {
            warn!(error = %e, "insight log append failed");
        }
    }

    // user side only
    let exchange_id = if auto_save_exchange {
        let mut meta = Metadata::new();
        meta.insert("type".into(), MetaValue::from("exchange_input"));
        meta.insert("source".into(), MetaValue::from("auto"));
        let content = format!("{EXCHANGE_PREFIX}{user_input}");
        match store.save_as(&content, Category::Exchange, meta).await {
            Ok(rec) => Some(rec.id),
            Err(e) => {
                warn!(error = %e, "exchange auto-save failed");
                None
            }
        }
    } else {
        None
    };

    info!(
        saves = parsed.saves.len(),
        insights = parsed.insights.len(),
        exchange = exchange_id.is_some(),
        "turn recorded"
    );
    Ok(TurnOutcome {
        response: parsed.response,
        saves: parsed.saves,
        insights: parsed.insights,
        saved_ids,
        exchange_id,
    })
}
