use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap, StatusCode},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::{convert::Infallible, net::SocketAddr};

use super::jwt::{Claims, TokenError};
use crate::{device::ClientContext, state::AppState};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Claims of a request carrying a valid bearer token.
pub struct AuthenticatedUser(pub Claims);

/// Like [`AuthenticatedUser`] but never rejects; invalid tokens read as `None`.
pub struct MaybeAuthenticated(pub Option<Claims>);

pub fn token_rejection(err: TokenError) -> (StatusCode, String) {
    let msg = match err {
        TokenError::Expired => "Token expired",
        TokenError::Invalid => "Invalid token",
    };
    (StatusCode::UNAUTHORIZED, msg.into())
}

async fn bearer_token(parts: &mut Parts, state: &AppState) -> Option<String> {
    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state).await.ok_or((
            StatusCode::UNAUTHORIZED,
            "Authorization header required".to_string(),
        ))?;

        let claims = state.tokens.verify(&token).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            token_rejection(err)
        })?;
        Ok(AuthenticatedUser(claims))
    }
}

impl FromRequestParts<AppState> for MaybeAuthenticated {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = match bearer_token(parts, state).await {
            Some(token) => match state.tokens.verify(&token) {
                Ok(claims) => Some(claims),
                Err(err) => {
                    tracing::debug!(error = %err, "ignoring unusable bearer token");
                    None
                }
            },
            None => None,
        };
        Ok(MaybeAuthenticated(claims))
    }
}

impl FromRequestParts<AppState> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(client_context(&parts.headers, peer, state.trust_forwarded_for))
    }
}

/// Client IP comes from the first `X-Forwarded-For` hop when the deployment
/// sits behind a proxy, otherwise from the socket peer.
pub fn client_context(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> ClientContext {
    let forwarded = trust_forwarded_for
        .then(|| headers.get(FORWARDED_FOR))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let ip = match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    };

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ClientContext { ip, user_agent }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::jwt::TokenService, db::memory::MemoryStore, state::test_state};
    use axum::http::{HeaderValue, Request};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::sync::Arc;

    fn parts_with(authorization: Option<&str>) -> Parts {
        let mut req = Request::builder().uri("/api/auth/me");
        if let Some(value) = authorization {
            req = req.header("authorization", value);
        }
        req.body(()).unwrap().into_parts().0
    }

    async fn reject(state: &AppState, authorization: Option<&str>) -> (StatusCode, String) {
        let mut parts = parts_with(authorization);
        match AuthenticatedUser::from_request_parts(&mut parts, state).await {
            Ok(_) => panic!("request should have been rejected"),
            Err(rejection) => rejection,
        }
    }

    async fn maybe(state: &AppState, authorization: Option<&str>) -> Option<Claims> {
        let mut parts = parts_with(authorization);
        match MaybeAuthenticated::from_request_parts(&mut parts, state).await {
            Ok(MaybeAuthenticated(claims)) => claims,
            Err(never) => match never {},
        }
    }

    fn expired_token() -> String {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: "u1".into(),
            email: "u1@example.com".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn valid_bearer_token_yields_claims() {
        let state = test_state(Arc::new(MemoryStore::new()));
        let token = state.tokens.issue("u1", "u1@example.com").unwrap();
        let header = format!("Bearer {token}");

        let mut parts = parts_with(Some(&header));
        let Ok(AuthenticatedUser(claims)) =
            AuthenticatedUser::from_request_parts(&mut parts, &state).await
        else {
            panic!("valid token rejected");
        };
        assert_eq!(claims.sub, "u1");
        assert_eq!(maybe(&state, Some(&header)).await.map(|c| c.sub), Some("u1".into()));
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let state = test_state(Arc::new(MemoryStore::new()));
        assert_eq!(
            reject(&state, None).await,
            (StatusCode::UNAUTHORIZED, "Authorization header required".to_string())
        );
        assert_eq!(
            reject(&state, Some("Basic dXNlcjpwdw==")).await.1,
            "Authorization header required"
        );
        assert!(maybe(&state, None).await.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() {
        let state = test_state(Arc::new(MemoryStore::new()));
        let header = format!("Bearer {}", expired_token());

        assert_eq!(
            reject(&state, Some(&header)).await,
            (StatusCode::UNAUTHORIZED, "Token expired".to_string())
        );
        assert!(maybe(&state, Some(&header)).await.is_none());
    }

    #[tokio::test]
    async fn foreign_or_garbled_token_is_invalid() {
        let state = test_state(Arc::new(MemoryStore::new()));
        let foreign = TokenService::new("someone-else", chrono::Duration::minutes(30))
            .issue("u1", "u1@example.com")
            .unwrap();

        for header in [format!("Bearer {foreign}"), "Bearer not.a.jwt".to_string()] {
            assert_eq!(
                reject(&state, Some(&header)).await,
                (StatusCode::UNAUTHORIZED, "Invalid token".to_string())
            );
            assert!(maybe(&state, Some(&header)).await.is_none());
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn uses_socket_peer_by_default() {
        let peer: SocketAddr = "10.0.0.1:51234".parse().unwrap();
        let ctx = client_context(
            &headers(&[("user-agent", "curl/8.4.0"), ("x-forwarded-for", "1.2.3.4")]),
            Some(peer),
            false,
        );
        assert_eq!(ctx.ip, "10.0.0.1");
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.4.0"));
    }

    #[test]
    fn trusts_first_forwarded_hop_when_enabled() {
        let peer: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let ctx = client_context(
            &headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.2")]),
            Some(peer),
            true,
        );
        assert_eq!(ctx.ip, "203.0.113.7");
        assert_eq!(ctx.user_agent, None);
    }

    #[test]
    fn unknown_without_any_source() {
        assert_eq!(client_context(&HeaderMap::new(), None, true).ip, "unknown");
    }
}
