//! Memory, search and archive handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::parse_category;
use crate::category::Category;
use crate::db::{ArchivedMemory, MemoryRecord, Metadata};
use crate::error::MetacogError;
use crate::store::{ArchiveResult, DeleteResult, PurgeResult, RestoreResult, SearchResult};
use crate::AppState;

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Deserialize)]
pub(super) struct CreateMemory {
    content: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

pub(super) async fn create_memory(
    State(state): State<AppState>,
    Json(input): Json<CreateMemory>,
) -> Result<(StatusCode, Json<MemoryRecord>), MetacogError> {
    let category = Category::resolve(input.category.as_deref())?;
    let rec = state
        .store
        .save_as(&input.content, category, input.metadata.unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(rec)))
}

#[derive(Deserialize)]
pub(super) struct ListQuery {
    category: Option<String>,
    limit: Option<usize>,
}

pub(super) async fn list_memories(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<MemoryRecord>>, MetacogError> {
    let category = parse_category(q.category.as_deref())?;
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIMIT);
    Ok(Json(state.store.list(category, Some(limit)).await))
}

pub(super) async fn get_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MemoryRecord>, MetacogError> {
    state.store.get(&id).await?.map(Json).ok_or(MetacogError::NotFound)
}

#[derive(Deserialize)]
pub(super) struct CountQuery {
    category: Option<String>,
}

pub(super) async fn count_memories(
    State(state): State<AppState>,
    Query(q): Query<CountQuery>,
) -> Result<Json<serde_json::Value>, MetacogError> {
    let category = parse_category(q.category.as_deref())?;
    let count = state.store.count(category).await;
    Ok(Json(serde_json::json!({ "count": count, "category": category })))
}

#[derive(Deserialize)]
pub(super) struct IdsBody {
    ids: Vec<String>,
}

pub(super) async fn batch_delete(
    State(state): State<AppState>,
    Json(body): Json<IdsBody>,
) -> Result<Json<DeleteResult>, MetacogError> {
    if body.ids.is_empty() {
        return Err(MetacogError::Validation("ids must not be empty".into()));
    }
    Ok(Json(state.store.batch_delete(body.ids).await?))
}

#[derive(Deserialize)]
pub(super) struct SearchBody {
    #[serde(default)]
    query: String,
    limit: Option<usize>,
    category: Option<String>,
}

#[derive(Serialize)]
pub(super) struct SearchResponse {
    results: Vec<SearchResult>,
    count: usize,
}

pub(super) async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, MetacogError> {
    let category = parse_category(body.category.as_deref())?;
    let limit = body.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).min(MAX_LIMIT);
    let results = state.store.search(&body.query, limit, category).await;
    Ok(Json(SearchResponse { count: results.len(), results }))
}

#[derive(Serialize)]
pub(super) struct ArchiveListing {
    index: usize,
    #[serde(flatten)]
    entry: ArchivedMemory,
}

pub(super) async fn list_archive(State(state): State<AppState>) -> Result<Json<Vec<ArchiveListing>>, MetacogError> {
    let entries = state.store.list_archive().await?;
    Ok(Json(
        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| ArchiveListing { index, entry })
            .collect(),
    ))
}

pub(super) async fn archive(
    State(state): State<AppState>,
    Json(body): Json<IdsBody>,
) -> Result<Json<ArchiveResult>, MetacogError> {
    if body.ids.is_empty() {
        return Err(MetacogError::Validation("ids must not be empty".into()));
    }
    Ok(Json(state.store.archive(body.ids).await?))
}

#[derive(Deserialize)]
pub(super) struct IndicesBody {
    indices: Vec<usize>,
}

pub(super) async fn restore_archive(
    State(state): State<AppState>,
    Json(body): Json<IndicesBody>,
) -> Result<Json<RestoreResult>, MetacogError> {
    Ok(Json(state.store.restore(&body.indices).await?))
}

pub(super) async fn purge_archive(
    State(state): State<AppState>,
    Json(body): Json<IndicesBody>,
) -> Result<Json<PurgeResult>, MetacogError> {
    Ok(Json(state.store.purge(&body.indices).await?))
}
