use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    device::DeviceAttributes,
    model::user::{User, UserRole},
};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: &'static str,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            refresh_token: None,
            token_type: "bearer",
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub organization: Option<String>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            organization: user.organization,
            is_active: user.is_active,
            created_at: Some(user.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CurrentDeviceResponse {
    pub device_info: DeviceAttributes,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub is_authenticated: bool,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
