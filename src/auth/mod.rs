use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub mod extract;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod types;
pub mod users;

pub use extract::AuthenticatedUser;
pub use jwt::TokenService;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(handlers::register_handler))
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/auth/me", get(handlers::me_handler))
        .route(
            "/api/auth/current-device",
            get(handlers::current_device_handler),
        )
        .route("/api/auth/refresh", post(handlers::refresh_handler))
}
