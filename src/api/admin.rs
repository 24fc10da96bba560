use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::db::{FeedbackEntry, InsightEntry, Metadata, ResetReport, ResetScope, ThoughtLogEntry};
use crate::dream::{DreamOutcome, DreamStats, ThresholdStatus};
use crate::error::MetacogError;
use crate::store::DreamExport;
use crate::thresholds::THOUGHT_EXPORT_LIMIT;
use crate::turn::TurnOutcome;
use crate::AppState;

#[derive(Deserialize)]
pub(super) struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub(super) struct FeedbackBody {
    feedback: String,
    #[serde(default)]
    context: Metadata,
}

pub(super) async fn create_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackBody>,
) -> Result<(StatusCode, Json<FeedbackEntry>), MetacogError> {
    let entry = state.store.save_feedback(&body.feedback, body.context).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub(super) async fn list_feedback(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<FeedbackEntry>>, MetacogError> {
    Ok(Json(state.store.list_feedback(q.limit).await?))
}

pub(super) async fn list_insights(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<InsightEntry>>, MetacogError> {
    Ok(Json(state.store.list_insights(q.limit).await?))
}

#[derive(Deserialize)]
pub(super) struct ThoughtBody {
    step: String,
    thought: String,
    #[serde(default)]
    memories_found: usize,
    #[serde(default)]
    extra: Metadata,
}

pub(super) async fn create_thought(
    State(state): State<AppState>,
    Json(body): Json<ThoughtBody>,
) -> Result<(StatusCode, Json<ThoughtLogEntry>), MetacogError> {
    let entry = state
        .store
        .save_thought(&body.step, &body.thought, body.memories_found, body.extra)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Newest 20 unless `limit` says otherwise.
pub(super) async fn list_thoughts(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<ThoughtLogEntry>>, MetacogError> {
    let limit = q.limit.unwrap_or(THOUGHT_EXPORT_LIMIT);
    Ok(Json(state.store.list_thoughts(Some(limit)).await?))
}

#[derive(Deserialize)]
pub(super) struct TurnBody {
    user_input: String,
    response: String,
    /// Overrides METACOG_AUTO_SAVE_EXCHANGE for this turn.
    auto_save_exchange: Option<bool>,
}

pub(super) async fn record_turn(
    State(state): State<AppState>,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnOutcome>, MetacogError> {
    let auto = body.auto_save_exchange.unwrap_or(state.auto_save_exchange);
    let out = crate::turn::record_turn(&state.store, &body.user_input, &body.response, auto).await?;
    Ok(Json(out))
}

/// Always a status-tagged body. Only `busy` changes the status code.
pub(super) async fn do_dream(State(state): State<AppState>) -> (StatusCode, Json<DreamOutcome>) {
    let outcome = state.dreamer.dream().await;
    let code = match outcome {
        DreamOutcome::Busy { .. } => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    (code, Json(outcome))
}

pub(super) async fn dream_stats(State(state): State<AppState>) -> Result<Json<DreamStats>, MetacogError> {
    Ok(Json(state.dreamer.stats().await?))
}

pub(super) async fn dream_report(State(state): State<AppState>) -> Result<Json<serde_json::Value>, MetacogError> {
    let report = state.dreamer.last_report().await?;
    Ok(Json(serde_json::json!({ "report": report })))
}

pub(super) async fn dream_threshold(State(state): State<AppState>) -> Json<ThresholdStatus> {
    Json(state.dreamer.threshold().await)
}

pub(super) async fn do_export(State(state): State<AppState>) -> Result<Json<DreamExport>, MetacogError> {
    Ok(Json(state.store.export().await?))
}

#[derive(Deserialize)]
pub(super) struct ResetBody {
    #[serde(default)]
    confirm: bool,
    #[serde(default)]
    scope: ResetScope,
}

/// Holds the dream lock for the whole wipe so no cycle can start halfway.
pub(super) async fn do_reset(
    State(state): State<AppState>,
    Json(body): Json<ResetBody>,
) -> Result<Json<ResetReport>, MetacogError> {
    if !body.confirm {
        return Err(MetacogError::Validation("reset requires {\"confirm\": true}".into()));
    }
    let Some(_guard) = state.dreamer.exclusive() else {
        return Err(MetacogError::Validation("dream cycle in progress".into()));
    };
    Ok(Json(state.store.reset_all(body.scope).await?))
}
