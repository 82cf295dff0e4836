use axum::{
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::{cmp::Reverse, collections::HashSet};

use crate::{
    db::{from_document, DocumentStore, Filter, StoreError, CLIPBOARD_ITEMS},
    model::clipboard::{ClipboardItem, ContentType},
    state::AppState,
};

pub mod handlers;

pub const LIST_DEFAULT_LIMIT: usize = 50;
pub const LIST_MAX_LIMIT: usize = 100;
pub const SEARCH_DEFAULT_LIMIT: usize = 20;
pub const SEARCH_MAX_LIMIT: usize = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/clipboard",
            get(handlers::list_items).post(handlers::create_item),
        )
        .route("/api/clipboard/search/{query}", get(handlers::search_items))
        .route("/api/clipboard/stats", get(handlers::item_stats))
        .route("/api/clipboard/{item_id}", delete(handlers::delete_item))
}

/// Items visible to `user_id`, newest first. `shared` widens the view to
/// every user's items.
pub async fn visible_items(
    store: &dyn DocumentStore,
    user_id: &str,
    shared: bool,
) -> Result<Vec<ClipboardItem>, StoreError> {
    let filter = if shared {
        Filter::new()
    } else {
        Filter::new().eq("user_id", user_id)
    };

    let mut items = store
        .query(CLIPBOARD_ITEMS, &filter)
        .await?
        .into_iter()
        .map(from_document::<ClipboardItem>)
        .collect::<Result<Vec<_>, _>>()?;
    items.sort_by_key(|item| Reverse(item.created_at));
    Ok(items)
}

/// Case-insensitive substring match on the content, first `limit` hits.
pub fn search(items: Vec<ClipboardItem>, query: &str, limit: usize) -> Vec<ClipboardItem> {
    let needle = query.to_lowercase();
    items
        .into_iter()
        .filter(|item| item.content.to_lowercase().contains(&needle))
        .take(limit)
        .collect()
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ClipboardStats {
    pub total_items: usize,
    pub text_items: usize,
    pub image_items: usize,
    pub file_items: usize,
    pub recent_items: usize,
    pub total_size_mb: f64,
    pub sync_count: usize,
    pub unique_users: usize,
    pub is_shared: bool,
}

impl ClipboardStats {
    pub fn from_items(items: &[ClipboardItem], shared: bool, now: DateTime<Utc>) -> Self {
        let count = |kind: ContentType| items.iter().filter(|i| i.content_type == kind).count();
        let since = now - Duration::hours(24);
        let bytes: usize = items.iter().map(|i| i.content.len()).sum();

        let unique_users = if shared {
            items
                .iter()
                .map(|i| i.user_id.as_str())
                .filter(|id| !id.is_empty())
                .collect::<HashSet<_>>()
                .len()
        } else {
            1
        };

        Self {
            total_items: items.len(),
            text_items: count(ContentType::Text),
            image_items: count(ContentType::Image),
            file_items: count(ContentType::File),
            recent_items: items.iter().filter(|i| i.created_at > since).count(),
            total_size_mb: (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            sync_count: items.len(),
            unique_users,
            is_shared: shared,
        }
    }
}
