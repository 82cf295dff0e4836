use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use super::{
    search, visible_items, ClipboardStats, LIST_DEFAULT_LIMIT, LIST_MAX_LIMIT,
    SEARCH_DEFAULT_LIMIT, SEARCH_MAX_LIMIT,
};
use crate::{
    api::{internal_error, ApiError},
    auth::AuthenticatedUser,
    db::{to_document, CLIPBOARD_ITEMS},
    model::clipboard::{ClipboardItem, ContentType},
    state::AppState,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_true")]
    pub shared: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(default = "default_true")]
    pub shared: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClipboardCreate {
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

pub async fn list_items(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ClipboardItem>>, ApiError> {
    let items = visible_items(state.store.as_ref(), &claims.sub, params.shared)
        .await
        .map_err(internal_error)?;

    let limit = params.limit.unwrap_or(LIST_DEFAULT_LIMIT).clamp(1, LIST_MAX_LIMIT);
    Ok(Json(
        items
            .into_iter()
            .skip(params.offset.unwrap_or(0))
            .take(limit)
            .collect(),
    ))
}

pub async fn create_item(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(req): Json<ClipboardCreate>,
) -> Result<Json<ClipboardItem>, ApiError> {
    if req.content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "content_required".into()));
    }

    let item = ClipboardItem {
        id: Uuid::new_v4().to_string(),
        content: req.content,
        content_type: req.content_type,
        domain: req.domain.filter(|d| !d.trim().is_empty()),
        user_id: claims.sub,
        created_at: Utc::now(),
        metadata: req.metadata.unwrap_or_default(),
    };

    state
        .store
        .create(CLIPBOARD_ITEMS, to_document(&item).map_err(internal_error)?)
        .await
        .map_err(internal_error)?;

    let listeners = state.hub.publish(item.clone());
    info!(
        item_id = item.id.as_str(),
        user_id = item.user_id.as_str(),
        listeners,
        "clipboard item created"
    );

    Ok(Json(item))
}

pub async fn search_items(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(query): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ClipboardItem>>, ApiError> {
    let items = visible_items(state.store.as_ref(), &claims.sub, params.shared)
        .await
        .map_err(internal_error)?;
    let limit = params
        .limit
        .unwrap_or(SEARCH_DEFAULT_LIMIT)
        .clamp(1, SEARCH_MAX_LIMIT);
    Ok(Json(search(items, &query, limit)))
}

pub async fn item_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(params): Query<StatsParams>,
) -> Result<Json<ClipboardStats>, ApiError> {
    let items = visible_items(state.store.as_ref(), &claims.sub, params.shared)
        .await
        .map_err(internal_error)?;
    Ok(Json(ClipboardStats::from_items(&items, params.shared, Utc::now())))
}

/// Shared history is append-only.
pub async fn delete_item(
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(_item_id): Path<String>,
) -> ApiError {
    (
        StatusCode::FORBIDDEN,
        "Deleting clipboard items is not allowed in shared mode".into(),
    )
}
