use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    classify::{classify_user_agent, derive_signature, DeviceAttributes},
    ClientContext, Principal,
};
use crate::{
    audit::AuditSink,
    db::{from_document, to_document, Document, DocumentStore, Filter, StoreError, DEVICES},
    model::{
        audit::AuditEvent,
        device::{Device, SIGNATURE_KEY},
    },
    outcome::SideEffect,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No device with this signature existed; one was created.
    New,
    /// An existing device was marked online again.
    Matched,
}

#[derive(Debug, Clone)]
pub struct DeviceResolution {
    pub device: Device,
    pub decision: Decision,
    /// Id of the audit event, or why it could not be written.
    pub audit: SideEffect<String>,
}

/// Maps `(user, client ip, user-agent)` onto a stable device record.
#[derive(Clone)]
pub struct DeviceResolver {
    store: Arc<dyn DocumentStore>,
    audit: Arc<dyn AuditSink>,
}

impl DeviceResolver {
    pub fn new(store: Arc<dyn DocumentStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Finds or creates the device for this client and records the decision.
    ///
    /// `is_first_device` is set only by account registration; it is the sole
    /// path that creates a trusted device. The lookup and the create are not
    /// atomic: two concurrent first logins with the same signature can both
    /// create a row.
    pub async fn resolve(
        &self,
        principal: &Principal,
        client: &ClientContext,
        is_first_device: bool,
    ) -> Result<DeviceResolution, StoreError> {
        let attrs = classify_user_agent(client.user_agent.as_deref());
        let signature = derive_signature(&attrs, &client.ip);

        let (device, decision) = match self.find_current(&principal.user_id, &signature).await? {
            Some(device) => (self.touch(device, true).await?, Decision::Matched),
            None => {
                let device = new_device(principal, client, &attrs, &signature, is_first_device);
                self.store.create(DEVICES, to_document(&device)?).await?;
                (device, Decision::New)
            }
        };

        info!(
            user_id = principal.user_id.as_str(),
            device_id = device.id.as_str(),
            signature = signature.as_str(),
            decision = ?decision,
            trusted = device.is_trusted,
            "device resolved"
        );

        let event = decision_event(principal, client, &attrs, &device, decision, is_first_device);
        let audit = SideEffect::from_result("audit", self.audit.append(event).await);

        Ok(DeviceResolution {
            device,
            decision,
            audit,
        })
    }

    /// Logout path. Marks the matching device offline, if any, and appends a
    /// logout audit event either way. Never fails from the caller's view.
    pub async fn mark_offline(
        &self,
        principal: &Principal,
        client: &ClientContext,
    ) -> SideEffect<Option<Device>> {
        let attrs = classify_user_agent(client.user_agent.as_deref());
        let signature = derive_signature(&attrs, &client.ip);

        let outcome = SideEffect::from_result("device_offline", self.offline(principal, &signature).await);

        let device_name = match &outcome {
            SideEffect::Applied(Some(device)) => device.name.clone(),
            _ => attrs.device_name.clone(),
        };
        let device_id = match &outcome {
            SideEffect::Applied(Some(device)) => Some(device.id.clone()),
            _ => None,
        };

        let event = AuditEvent::new("User Logout", &principal.email, &principal.user_id)
            .device(device_name.clone(), device_id)
            .ip(&client.ip)
            .details(format!("User logged out from device: {device_name}"))
            .metadata(json!({
                "platform": attrs.platform,
                "browser": attrs.browser,
            }));
        let _ = SideEffect::from_result("audit", self.audit.append(event).await);

        outcome
    }

    async fn offline(
        &self,
        principal: &Principal,
        signature: &str,
    ) -> Result<Option<Device>, StoreError> {
        match self.find_current(&principal.user_id, signature).await? {
            Some(device) => Ok(Some(self.touch(device, false).await?)),
            None => {
                debug!(
                    user_id = principal.user_id.as_str(),
                    signature, "no device matches logout signature"
                );
                Ok(None)
            }
        }
    }

    /// Most recently seen device of `user_id` carrying `signature`.
    async fn find_current(
        &self,
        user_id: &str,
        signature: &str,
    ) -> Result<Option<Device>, StoreError> {
        let filter = Filter::new()
            .eq("user_id", user_id)
            .eq(format!("metadata.{SIGNATURE_KEY}"), signature);

        let mut current: Option<Device> = None;
        for doc in self.store.query(DEVICES, &filter).await? {
            let device: Device = from_document(doc)?;
            if current
                .as_ref()
                .map_or(true, |seen| device.last_seen > seen.last_seen)
            {
                current = Some(device);
            }
        }
        Ok(current)
    }

    async fn touch(&self, mut device: Device, online: bool) -> Result<Device, StoreError> {
        let now = Utc::now();
        let mut patch = Document::new();
        patch.insert("is_online".into(), Value::Bool(online));
        patch.insert("last_seen".into(), json!(now));

        if !self.store.update(DEVICES, &device.id, patch).await? {
            debug!(device_id = device.id.as_str(), "device vanished before update");
        }

        device.is_online = online;
        device.last_seen = now;
        Ok(device)
    }
}

fn new_device(
    principal: &Principal,
    client: &ClientContext,
    attrs: &DeviceAttributes,
    signature: &str,
    is_first_device: bool,
) -> Device {
    let now = Utc::now();
    let source = if is_first_device {
        "user_registration"
    } else {
        "user_login"
    };

    let mut metadata = Map::new();
    metadata.insert(SIGNATURE_KEY.into(), Value::String(signature.to_string()));
    metadata.insert("source".into(), Value::String(source.into()));

    Device {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: principal.user_id.clone(),
        name: attrs.device_name.clone(),
        device_type: attrs.device_type,
        platform: attrs.platform,
        browser: attrs.browser,
        browser_version: attrs.browser_version().map(str::to_string),
        os_version: attrs.os_version().map(str::to_string),
        ip_address: Some(client.ip.clone()),
        user_agent: client.user_agent.clone(),
        is_trusted: is_first_device,
        is_online: true,
        last_seen: now,
        created_at: now,
        metadata,
    }
}

fn decision_event(
    principal: &Principal,
    client: &ClientContext,
    attrs: &DeviceAttributes,
    device: &Device,
    decision: Decision,
    is_first_device: bool,
) -> AuditEvent {
    let (action, details) = match decision {
        Decision::New if is_first_device => (
            "User Registration",
            format!("New user registered with device {}", device.name),
        ),
        Decision::New => (
            "New Device Login",
            format!("User logged in from new device: {}", device.name),
        ),
        Decision::Matched => (
            "User Login",
            format!("User logged in from existing device: {}", device.name),
        ),
    };

    let mut metadata = json!({
        "email": principal.email,
        "platform": attrs.platform,
        "browser": attrs.browser,
        "device_type": attrs.device_type,
    });
    if decision == Decision::Matched {
        metadata["existing_device"] = json!(true);
    }

    AuditEvent::new(action, &principal.email, &principal.user_id)
        .device(device.name.clone(), Some(device.id.clone()))
        .ip(&client.ip)
        .details(details)
        .metadata(metadata)
}
