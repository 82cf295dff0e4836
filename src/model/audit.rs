use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    #[default]
    Success,
    Warning,
    Error,
    Info,
}

/// Append-only record of a security or activity relevant change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    /// Display identity, usually the email.
    pub user: String,
    pub user_id: String,
    pub device: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub status: AuditStatus,
    pub ip_address: String,
    pub details: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, user: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.into(),
            user: user.into(),
            user_id: user_id.into(),
            device: "API".into(),
            device_id: None,
            status: AuditStatus::Success,
            ip_address: "unknown".into(),
            details: String::new(),
            metadata: None,
        }
    }

    pub fn device(mut self, name: impl Into<String>, id: Option<String>) -> Self {
        self.device = name.into();
        self.device_id = id;
        self
    }

    pub fn status(mut self, status: AuditStatus) -> Self {
        self.status = status;
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = ip.into();
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
