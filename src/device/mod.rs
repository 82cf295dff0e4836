use axum::{
    routing::{get, put},
    Router,
};

use crate::state::AppState;

pub mod classify;
pub mod handlers;
pub mod resolver;

pub use classify::{classify_user_agent, DeviceAttributes};
pub use resolver::DeviceResolver;

/// Identity asserted by a verified token or a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
}

/// What the transport tells us about the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/devices",
            get(handlers::list_devices).post(handlers::register_device),
        )
        .route("/api/devices/{device_id}/trust", put(handlers::set_trust))
}
