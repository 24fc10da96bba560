use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::category::Category;
use crate::error::MetacogError;
use crate::AppState;

mod admin;
mod memory;

use admin::*;
use memory::*;

/// Parse an optional `category` query/body field. Reads are strict: an
/// unknown name is a 400 rather than a silent switch to the default.
fn parse_category(raw: Option<&str>) -> Result<Option<Category>, MetacogError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| MetacogError::Validation(format!("unknown category: {s}"))),
    }
}

/// Auth middleware: checks Bearer token if METACOG_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, MetacogError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let unauthorized = || MetacogError::Unauthorized;

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    // constant-time compare
    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(unauthorized())
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats));

    let protected = Router::new()
        .route("/memories", post(create_memory).get(list_memories).delete(batch_delete))
        .route("/memories/count", get(count_memories))
        .route("/memories/{id}", get(get_memory))
        .route("/search", post(search))
        .route("/archive", get(list_archive).post(archive).delete(purge_archive))
        .route("/archive/restore", post(restore_archive))
        .route("/feedback", post(create_feedback).get(list_feedback))
        .route("/insights", get(list_insights))
        .route("/thoughts", post(create_thought).get(list_thoughts))
        .route("/turns", post(record_turn))
        .route("/dream", post(do_dream))
        .route("/dream/stats", get(dream_stats))
        .route("/dream/report", get(dream_report))
        .route("/dream/threshold", get(dream_threshold))
        .route("/export", get(do_export))
        .route("/reset", post(do_reset))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // /turns carries whole assistant replies
    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(256 * 1024))
        .with_state(state)
}

/// GET /health: liveness plus what is wired up.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (cache_len, cache_cap, cache_hits, cache_misses) = state.store.embed_cache().stats();
    Json(serde_json::json!({
        "name": "metacog",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "embedder": state.store.has_embedder(),
        "generator": state.dreamer.has_generator(),
        "auth": state.api_key.is_some(),
        "memories": state.store.count(None).await,
        "embed_cache": { "size": cache_len, "capacity": cache_cap, "hits": cache_hits, "misses": cache_misses },
    }))
}

/// GET /stats: live counts per category plus log sizes.
async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, MetacogError> {
    let mut by_category = serde_json::Map::new();
    for c in Category::ALL {
        by_category.insert(c.as_str().to_string(), state.store.count(Some(c)).await.into());
    }
    Ok(Json(serde_json::json!({
        "total": state.store.count(None).await,
        "by_category": by_category,
        "archived": state.store.archive_count().await?,
        "pending_feedback": state.store.list_feedback(None).await?.len(),
        "feedback_archived": state.store.feedback_archived_count().await?,
        "insights": state.store.insight_count().await?,
    })))
}
