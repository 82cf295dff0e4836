use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use super::{events_for_user, AuditQuery, AuditStats};
use crate::{
    api::{internal_error, ApiError},
    auth::AuthenticatedUser,
    device::ClientContext,
    model::audit::{AuditEvent, AuditStatus},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct AuditCreate {
    pub action: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub status: AuditStatus,
    #[serde(default)]
    pub device: Option<String>,
}

pub async fn list_events(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let events = events_for_user(state.store.as_ref(), &claims.sub)
        .await
        .map_err(internal_error)?;
    Ok(Json(query.apply(events)))
}

pub async fn event_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> Result<Json<AuditStats>, ApiError> {
    let events = events_for_user(state.store.as_ref(), &claims.sub)
        .await
        .map_err(internal_error)?;
    Ok(Json(AuditStats::from_events(&events, Utc::now())))
}

/// Manual entry from a client. Unlike tracked side effects, a failed write
/// here is the caller's error.
pub async fn create_event(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    client: ClientContext,
    Json(req): Json<AuditCreate>,
) -> Result<Json<AuditEvent>, ApiError> {
    if req.action.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "action_required".into()));
    }

    let mut event = AuditEvent::new(req.action.trim(), &claims.email, &claims.sub)
        .status(req.status)
        .ip(&client.ip)
        .details(req.details);
    if let Some(device) = req.device.filter(|d| !d.trim().is_empty()) {
        event = event.device(device, None);
    }

    let id = state
        .audit
        .append(event.clone())
        .await
        .map_err(internal_error)?;
    event.id = id;
    Ok(Json(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::jwt::Claims,
        db::{memory::MemoryStore, AUDIT_LOGS},
        state::test_state,
    };
    use std::sync::Arc;

    fn claims() -> Claims {
        Claims {
            sub: "u1".into(),
            email: "ada@example.com".into(),
            iat: 0,
            exp: 0,
        }
    }

    fn client() -> ClientContext {
        ClientContext {
            ip: "10.0.0.1".into(),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn manual_events_are_listed_for_their_owner_only() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());

        let Json(created) = create_event(
            State(state.clone()),
            AuthenticatedUser(claims()),
            client(),
            Json(AuditCreate {
                action: "Clipboard Export".into(),
                details: "exported 3 items".into(),
                status: AuditStatus::Info,
                device: Some("Laptop".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(created.device, "Laptop");
        assert_eq!(store.count(AUDIT_LOGS).await, 1);

        let Json(mine) = list_events(
            State(state.clone()),
            AuthenticatedUser(claims()),
            Query(AuditQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, created.id);

        let other = Claims {
            sub: "u2".into(),
            ..claims()
        };
        let Json(theirs) = list_events(
            State(state),
            AuthenticatedUser(other),
            Query(AuditQuery::default()),
        )
        .await
        .unwrap();
        assert!(theirs.is_empty());
    }

    #[tokio::test]
    async fn manual_event_write_failure_is_reported() {
        let state = test_state(Arc::new(MemoryStore::failing_on(&[AUDIT_LOGS])));
        let err = create_event(
            State(state),
            AuthenticatedUser(claims()),
            client(),
            Json(AuditCreate {
                action: "Clipboard Export".into(),
                details: String::new(),
                status: AuditStatus::Success,
                device: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
