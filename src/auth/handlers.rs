use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    extract::{AuthenticatedUser, MaybeAuthenticated},
    jwt::Claims,
    password::{hash_password, verify_password},
    types::*,
    users,
};
use crate::{
    api::{internal_error, ApiError},
    device::{classify_user_agent, ClientContext, Principal},
    model::{
        audit::{AuditEvent, AuditStatus},
        user::{normalize_email, User, UserRole},
    },
    outcome::SideEffect,
    state::AppState,
};

fn invalid_credentials() -> ApiError {
    (StatusCode::UNAUTHORIZED, "Invalid credentials".into())
}

pub async fn register_handler(
    State(state): State<AppState>,
    client: ClientContext,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    register_user(&state, req, &client).await.map(Json)
}

pub async fn login_handler(
    State(state): State<AppState>,
    client: ClientContext,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    login_user(&state, req, &client).await.map(Json)
}

pub async fn logout_handler(
    State(state): State<AppState>,
    MaybeAuthenticated(claims): MaybeAuthenticated,
    client: ClientContext,
) -> Json<MessageResponse> {
    logout_user(&state, claims.as_ref(), &client).await;
    Json(MessageResponse {
        message: "Logged out successfully",
    })
}

pub async fn me_handler(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> Json<UserResponse> {
    Json(current_user(&state, &claims).await)
}

pub async fn current_device_handler(
    MaybeAuthenticated(claims): MaybeAuthenticated,
    client: ClientContext,
) -> Json<CurrentDeviceResponse> {
    Json(CurrentDeviceResponse {
        device_info: classify_user_agent(client.user_agent.as_deref()),
        ip_address: client.ip,
        user_agent: client.user_agent,
        is_authenticated: claims.is_some(),
        user_id: claims.map(|c| c.sub),
    })
}

pub async fn refresh_handler() -> ApiError {
    (StatusCode::NOT_IMPLEMENTED, "Not implemented".into())
}

// ------------------------------------------------------------
// FLOWS
// ------------------------------------------------------------

/// Creates the account, then registers the calling device as the user's
/// first, trusted device. Device tracking is best effort.
pub async fn register_user(
    state: &AppState,
    req: RegisterRequest,
    client: &ClientContext,
) -> Result<UserResponse, ApiError> {
    let email = normalize_email(&req.email);
    let name = req.name.trim().to_string();

    if !email.contains('@') || name.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "email, name and password are required".into(),
        ));
    }

    if users::find_by_email(state.store.as_ref(), &email)
        .await
        .map_err(internal_error)?
        .is_some()
    {
        return Err((StatusCode::BAD_REQUEST, "Email already registered".into()));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.clone(),
        name,
        role: UserRole::User,
        organization: req.organization.filter(|o| !o.trim().is_empty()),
        is_active: true,
        created_at: Utc::now(),
        password_hash: Some(hash_password(&req.password).map_err(internal_error)?),
    };

    users::insert(state.store.as_ref(), &user)
        .await
        .map_err(internal_error)?;

    let principal = Principal {
        user_id: user.id.clone(),
        email,
    };
    let device = SideEffect::from_result(
        "device_registration",
        state.devices.resolve(&principal, client, true).await,
    )
    .applied();

    info!(
        user_id = user.id.as_str(),
        email = principal.email.as_str(),
        device_id = device.as_ref().map(|r| r.device.id.as_str()).unwrap_or("none"),
        "user registered"
    );

    Ok(user.into())
}

/// Verifies credentials and issues a token. A failing device store never
/// turns a correct login into an error.
pub async fn login_user(
    state: &AppState,
    req: LoginRequest,
    client: &ClientContext,
) -> Result<TokenResponse, ApiError> {
    let email = normalize_email(&req.email);

    let user = users::find_by_email(state.store.as_ref(), &email)
        .await
        .map_err(internal_error)?
        .ok_or_else(invalid_credentials)?;

    let Some(hash) = user.password_hash.as_deref() else {
        return Err(invalid_credentials());
    };

    let valid = verify_password(hash, &req.password).unwrap_or_else(|err| {
        warn!(user_id = user.id.as_str(), error = %err, "stored password hash is unreadable");
        false
    });

    if !valid {
        record_failed_login(state, &user, client).await;
        return Err(invalid_credentials());
    }

    if !user.is_active {
        return Err((StatusCode::FORBIDDEN, "Account disabled".into()));
    }

    let access_token = state
        .tokens
        .issue(&user.id, &user.email)
        .map_err(internal_error)?;
    let principal = Principal {
        user_id: user.id,
        email: user.email,
    };
    let device = SideEffect::from_result(
        "device_resolution",
        state.devices.resolve(&principal, client, false).await,
    );
    info!(
        user_id = principal.user_id.as_str(),
        device_tracked = device.is_applied(),
        "login succeeded"
    );

    Ok(TokenResponse::bearer(access_token))
}

/// Logout always succeeds; without usable claims there is nothing to record.
pub async fn logout_user(state: &AppState, claims: Option<&Claims>, client: &ClientContext) {
    if let Some(claims) = claims {
        state.devices.mark_offline(&claims.principal(), client).await;
    }
}

/// Stored profile of the token subject, or one rebuilt from the claims when
/// the user row cannot be read.
pub async fn current_user(state: &AppState, claims: &Claims) -> UserResponse {
    match users::find_by_id(state.store.as_ref(), &claims.sub).await {
        Ok(Some(user)) => return user.into(),
        Ok(None) => {}
        Err(err) => warn!(user_id = claims.sub.as_str(), error = %err, "user lookup failed"),
    }

    UserResponse {
        id: claims.sub.clone(),
        email: claims.email.clone(),
        name: display_name_from_email(&claims.email),
        role: UserRole::User,
        organization: None,
        is_active: true,
        created_at: None,
    }
}

fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let mut chars = local.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

async fn record_failed_login(state: &AppState, user: &User, client: &ClientContext) {
    let attrs = classify_user_agent(client.user_agent.as_deref());
    let event = AuditEvent::new("Failed Login", &user.email, &user.id)
        .device(attrs.device_name.clone(), None)
        .status(AuditStatus::Error)
        .ip(&client.ip)
        .details(format!("Invalid password from {}", attrs.device_name))
        .metadata(json!({
            "platform": attrs.platform,
            "browser": attrs.browser,
        }));
    let _ = SideEffect::from_result("audit", state.audit.append(event).await);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{memory::MemoryStore, DocumentStore, Filter, AUDIT_LOGS, DEVICES},
        state::test_state,
    };
    use std::sync::Arc;

    const UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn client(ip: &str) -> ClientContext {
        ClientContext {
            ip: ip.into(),
            user_agent: Some(UA.into()),
        }
    }

    fn register_req(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            name: "Ada".into(),
            password: "hunter22".into(),
            organization: None,
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    async fn actions(store: &MemoryStore) -> Vec<String> {
        store
            .query(AUDIT_LOGS, &Filter::new())
            .await
            .unwrap()
            .into_iter()
            .map(|d| d["action"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn registration_trusts_first_device_and_rejects_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());

        let user = register_user(&state, register_req(" Ada@Example.com "), &client("10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");

        let devices = store.query(DEVICES, &Filter::new()).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0]["is_trusted"], json!(true));
        assert_eq!(actions(&store).await, vec!["User Registration"]);

        let err = register_user(&state, register_req("ada@example.com"), &client("10.0.0.1"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_flow_matches_then_discovers_new_ip() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());
        register_user(&state, register_req("ada@example.com"), &client("10.0.0.1"))
            .await
            .unwrap();

        let token = login_user(&state, login_req("ada@example.com", "hunter22"), &client("10.0.0.1"))
            .await
            .unwrap();
        let claims = state.tokens.verify(&token.access_token).unwrap();
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(store.count(DEVICES).await, 1);

        login_user(&state, login_req("ada@example.com", "hunter22"), &client("10.0.0.2"))
            .await
            .unwrap();
        let devices = store.query(DEVICES, &Filter::new()).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices.iter().filter(|d| d["is_trusted"] == json!(true)).count(), 1);
        assert_eq!(
            actions(&store).await,
            vec!["User Registration", "User Login", "New Device Login"]
        );
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_and_audited() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());
        register_user(&state, register_req("ada@example.com"), &client("10.0.0.1"))
            .await
            .unwrap();

        let err = login_user(&state, login_req("ada@example.com", "nope"), &client("10.0.0.1"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);

        let err = login_user(&state, login_req("ghost@example.com", "nope"), &client("10.0.0.1"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);

        assert_eq!(actions(&store).await, vec!["User Registration", "Failed Login"]);
    }

    #[tokio::test]
    async fn login_survives_device_store_outage() {
        let store = Arc::new(MemoryStore::failing_on(&[DEVICES, AUDIT_LOGS]));
        let state = test_state(store);

        register_user(&state, register_req("ada@example.com"), &client("10.0.0.1"))
            .await
            .unwrap();
        let token = login_user(&state, login_req("ada@example.com", "hunter22"), &client("10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(token.token_type, "bearer");
        assert!(state.tokens.verify(&token.access_token).is_ok());
    }

    #[tokio::test]
    async fn logout_marks_device_offline_and_tolerates_missing_claims() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());
        let user = register_user(&state, register_req("ada@example.com"), &client("10.0.0.1"))
            .await
            .unwrap();

        logout_user(&state, None, &client("10.0.0.1")).await;
        assert_eq!(actions(&store).await, vec!["User Registration"]);

        let claims = Claims {
            sub: user.id,
            email: user.email,
            iat: 0,
            exp: 0,
        };
        logout_user(&state, Some(&claims), &client("10.0.0.1")).await;

        let devices = store.query(DEVICES, &Filter::new()).await.unwrap();
        assert_eq!(devices[0]["is_online"], json!(false));
        assert_eq!(actions(&store).await, vec!["User Registration", "User Logout"]);
    }

    #[tokio::test]
    async fn me_falls_back_to_token_claims() {
        let state = test_state(Arc::new(MemoryStore::new()));
        let claims = Claims {
            sub: "orphan".into(),
            email: "grace.hopper@example.com".into(),
            iat: 0,
            exp: 0,
        };

        let user = current_user(&state, &claims).await;
        assert_eq!(user.id, "orphan");
        assert_eq!(user.name, "Grace.hopper");
        assert_eq!(user.created_at, None);
    }
}
