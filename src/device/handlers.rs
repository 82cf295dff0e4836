use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::cmp::Reverse;

use super::{classify_user_agent, ClientContext};
use crate::{
    api::{internal_error, ApiError},
    auth::AuthenticatedUser,
    db::{from_document, to_document, Document, Filter, StoreError, DEVICES},
    model::{
        audit::{AuditEvent, AuditStatus},
        device::{Browser, Device, DeviceClass, Platform},
    },
    outcome::SideEffect,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct DeviceCreate {
    pub name: String,
    #[serde(default)]
    pub device_type: DeviceClass,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub browser: Option<Browser>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct TrustUpdate {
    pub is_trusted: bool,
}

pub async fn list_devices(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> Result<Json<Vec<Device>>, ApiError> {
    let devices = devices_for_user(&state, &claims.sub)
        .await
        .map_err(internal_error)?;
    Ok(Json(devices))
}

pub async fn register_device(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    client: ClientContext,
    Json(req): Json<DeviceCreate>,
) -> Result<Json<Device>, ApiError> {
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name_required".into()));
    }

    let device = manual_device(&claims.sub, &client, req);
    state
        .store
        .create(DEVICES, to_document(&device).map_err(internal_error)?)
        .await
        .map_err(internal_error)?;

    Ok(Json(device))
}

pub async fn set_trust(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    client: ClientContext,
    Path(device_id): Path<String>,
    Json(req): Json<TrustUpdate>,
) -> Result<Json<Device>, ApiError> {
    let device = update_trust(&state, &claims.sub, &device_id, req.is_trusted)
        .await
        .map_err(internal_error)?
        .ok_or((StatusCode::NOT_FOUND, "Device not found".into()))?;

    let event = AuditEvent::new("Device Trust Updated", &claims.email, &claims.sub)
        .device(device.name.clone(), Some(device.id.clone()))
        .status(AuditStatus::Info)
        .ip(&client.ip)
        .details(format!(
            "Device {} marked as {}",
            device.name,
            if device.is_trusted { "trusted" } else { "untrusted" }
        ))
        .metadata(json!({ "is_trusted": device.is_trusted }));
    let _ = SideEffect::from_result("audit", state.audit.append(event).await);

    Ok(Json(device))
}

/// Devices owned by `user_id`, most recently seen first.
pub async fn devices_for_user(state: &AppState, user_id: &str) -> Result<Vec<Device>, StoreError> {
    let docs = state
        .store
        .query(DEVICES, &Filter::new().eq("user_id", user_id))
        .await?;
    let mut devices = docs
        .into_iter()
        .map(from_document::<Device>)
        .collect::<Result<Vec<_>, _>>()?;
    devices.sort_by_key(|d| Reverse(d.last_seen));
    Ok(devices)
}

/// Returns `None` when the device does not exist or belongs to someone else.
pub async fn update_trust(
    state: &AppState,
    user_id: &str,
    device_id: &str,
    is_trusted: bool,
) -> Result<Option<Device>, StoreError> {
    let Some(doc) = state.store.get(DEVICES, device_id).await? else {
        return Ok(None);
    };
    let mut device: Device = from_document(doc)?;
    if device.user_id != user_id {
        return Ok(None);
    }

    let mut patch = Document::new();
    patch.insert("is_trusted".into(), Value::Bool(is_trusted));
    patch.insert("updated_at".into(), json!(Utc::now()));
    state.store.update(DEVICES, device_id, patch).await?;

    device.is_trusted = is_trusted;
    Ok(Some(device))
}

fn manual_device(user_id: &str, client: &ClientContext, req: DeviceCreate) -> Device {
    let attrs = classify_user_agent(client.user_agent.as_deref());
    let now = Utc::now();

    let mut metadata = req.metadata.unwrap_or_default();
    metadata.insert("source".into(), Value::String("manual".into()));

    Device {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: req.name.trim().to_string(),
        device_type: req.device_type,
        platform: req.platform.unwrap_or(attrs.platform),
        browser: req.browser.unwrap_or(attrs.browser),
        browser_version: attrs.browser_version().map(str::to_string),
        os_version: attrs.os_version().map(str::to_string),
        ip_address: Some(client.ip.clone()),
        user_agent: client.user_agent.clone(),
        is_trusted: false,
        is_online: true,
        last_seen: now,
        created_at: now,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory::MemoryStore,
        device::Principal,
        state::test_state,
    };
    use std::sync::Arc;

    fn principal(id: &str) -> Principal {
        Principal {
            user_id: id.into(),
            email: format!("{id}@example.com"),
        }
    }

    fn client(ip: &str) -> ClientContext {
        ClientContext {
            ip: ip.into(),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".into()),
        }
    }

    #[tokio::test]
    async fn lists_only_own_devices_newest_first() {
        let state = test_state(Arc::new(MemoryStore::new()));
        state.devices.resolve(&principal("u1"), &client("10.0.0.1"), true).await.unwrap();
        let newer = state
            .devices
            .resolve(&principal("u1"), &client("10.0.0.2"), false)
            .await
            .unwrap();
        state.devices.resolve(&principal("u2"), &client("10.0.0.3"), true).await.unwrap();

        let devices = devices_for_user(&state, "u1").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, newer.device.id);
        assert!(devices.iter().all(|d| d.user_id == "u1"));
    }

    #[tokio::test]
    async fn trust_update_is_owner_only() {
        let state = test_state(Arc::new(MemoryStore::new()));
        let res = state
            .devices
            .resolve(&principal("u1"), &client("10.0.0.1"), false)
            .await
            .unwrap();
        assert!(!res.device.is_trusted);

        assert!(update_trust(&state, "u2", &res.device.id, true).await.unwrap().is_none());
        assert!(update_trust(&state, "u1", "missing", true).await.unwrap().is_none());

        let updated = update_trust(&state, "u1", &res.device.id, true).await.unwrap().unwrap();
        assert!(updated.is_trusted);
        let stored = devices_for_user(&state, "u1").await.unwrap();
        assert!(stored[0].is_trusted);
    }

    #[test]
    fn manual_devices_are_untrusted_and_fill_gaps_from_user_agent() {
        let device = manual_device(
            "u1",
            &client("10.0.0.9"),
            DeviceCreate {
                name: " Work laptop ".into(),
                device_type: DeviceClass::Desktop,
                platform: None,
                browser: Some(Browser::Chrome),
                metadata: None,
            },
        );

        assert_eq!(device.name, "Work laptop");
        assert!(!device.is_trusted);
        assert_eq!(device.platform, Platform::Linux);
        assert_eq!(device.browser, Browser::Chrome);
        assert_eq!(device.metadata["source"], json!("manual"));
        assert!(device.signature().is_none());
    }
}
