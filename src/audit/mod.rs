use axum::{routing::get, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::{
    db::{from_document, DocumentStore, Filter, StoreError, AUDIT_LOGS},
    model::audit::{AuditEvent, AuditStatus},
    state::AppState,
};

pub mod handlers;
pub mod sink;

pub use sink::{AuditSink, StoreAuditSink};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/audit",
            get(handlers::list_events).post(handlers::create_event),
        )
        .route("/api/audit/stats", get(handlers::event_stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    /// `success`, `warning`, `error` or `info`; anything else means no filter.
    #[serde(default)]
    pub status_filter: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

impl AuditQuery {
    fn status(&self) -> Option<AuditStatus> {
        match self.status_filter.as_deref()?.trim().to_ascii_lowercase().as_str() {
            "success" => Some(AuditStatus::Success),
            "warning" => Some(AuditStatus::Warning),
            "error" => Some(AuditStatus::Error),
            "info" => Some(AuditStatus::Info),
            _ => None,
        }
    }

    fn accepts(event: &AuditEvent, status: Option<AuditStatus>, needle: Option<&str>) -> bool {
        if status.is_some_and(|s| s != event.status) {
            return false;
        }
        match needle {
            Some(needle) => [&event.action, &event.details, &event.user]
                .iter()
                .any(|field| field.to_lowercase().contains(needle)),
            None => true,
        }
    }

    /// Filters, orders newest first, then pages `events`.
    pub fn apply(&self, mut events: Vec<AuditEvent>) -> Vec<AuditEvent> {
        let needle = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let status = self.status();

        events.retain(|e| Self::accepts(e, status, needle.as_deref()));
        events.sort_by_key(|e| Reverse(e.timestamp));

        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        events
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(limit)
            .collect()
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AuditStats {
    pub total_events: usize,
    pub success_rate: f64,
    pub security_events: usize,
    pub failed_attempts: usize,
    pub last_24h: usize,
}

impl AuditStats {
    pub fn from_events(events: &[AuditEvent], now: DateTime<Utc>) -> Self {
        let count = |status: AuditStatus| events.iter().filter(|e| e.status == status).count();
        let total = events.len();
        let success = count(AuditStatus::Success);
        let errors = count(AuditStatus::Error);
        let warnings = count(AuditStatus::Warning);

        let success_rate = if total == 0 {
            100.0
        } else {
            (success as f64 / total as f64 * 1000.0).round() / 10.0
        };

        let since = now - Duration::hours(24);
        Self {
            total_events: total,
            success_rate,
            security_events: errors + warnings,
            failed_attempts: errors,
            last_24h: events.iter().filter(|e| e.timestamp >= since).count(),
        }
    }
}

pub async fn events_for_user(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<Vec<AuditEvent>, StoreError> {
    store
        .query(AUDIT_LOGS, &Filter::new().eq("user_id", user_id))
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}
