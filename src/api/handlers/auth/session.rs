//! Session cookie handling and logout.

use anyhow::Result;
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Extension,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::storage::{self, SessionRecord};
use super::utils::{extract_client_ip, hash_token};

pub(crate) const SESSION_COOKIE: &str = "portero_session";

/// Extract the raw session token from the Cookie header, if present.
pub(crate) fn session_cookie_value(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, token)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}

/// Build the Set-Cookie value for a fresh session. The cookie is host-only
/// and HttpOnly; Secure is added when the public base URL is https. Max-Age
/// bounds the cookie lifetime client-side, the server keeps sessions until
/// logout.
pub(crate) fn build_session_cookie(token: &str, secure: bool, max_age_seconds: i64) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub(crate) fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Resolve the request's session cookie to an active user, if any. A hit
/// refreshes the stored ip/user-agent, the only update sessions receive.
pub(crate) async fn current_session(
    pool: &PgPool,
    headers: &HeaderMap,
) -> Result<Option<SessionRecord>> {
    let Some(token) = session_cookie_value(headers) else {
        return Ok(None);
    };
    let token_hash = hash_token(&token);
    let session = storage::lookup_session(pool, &token_hash).await?;

    if session.is_some() {
        let ip_address = extract_client_ip(headers).and_then(|ip| ip.parse().ok());
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok());
        storage::refresh_session(pool, &token_hash, ip_address, user_agent).await?;
    }

    Ok(session)
}

/// Terminate the current session and clear the cookie. Idempotent.
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 204, description = "Session terminated, cookie cleared"),
        (status = 500, description = "Server error")
    ),
    tag = "session"
)]
pub async fn logout(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = session_cookie_value(&headers) {
        if let Err(err) = storage::delete_session(&pool, &hash_token(&token)).await {
            error!("Failed to delete session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let mut response_headers = HeaderMap::new();
    let cookie = clear_session_cookie(state.config().session_cookie_secure());
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response_headers.insert(header::SET_COOKIE, value);
    }

    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::AuthConfig;
    use axum::http::HeaderValue;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
    use std::time::Duration;

    fn unreachable_pool() -> PgPool {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("invalid")
            .database("invalid")
            .ssl_mode(PgSslMode::Disable);
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options)
    }

    #[test]
    fn cookie_value_parsed_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; portero_session=abc123; theme=dark"),
        );
        assert_eq!(session_cookie_value(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn cookie_value_absent_or_empty() {
        let headers = HeaderMap::new();
        assert!(session_cookie_value(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("portero_session="));
        assert!(session_cookie_value(&headers).is_none());
    }

    #[test]
    fn session_cookie_flags() {
        let cookie = build_session_cookie("tok", false, 43_200);
        assert_eq!(
            cookie,
            "portero_session=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=43200"
        );
        let cookie = build_session_cookie("tok", true, 43_200);
        assert!(cookie.ends_with("; Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(false);
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.starts_with("portero_session=;"));
    }

    #[tokio::test]
    async fn logout_without_cookie_is_no_content() {
        let pool = unreachable_pool();
        let state = Arc::new(AuthState::new(AuthConfig::new(
            "http://localhost:8080".to_string(),
        )));
        let response = logout(Extension(pool), Extension(state), HeaderMap::new())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn logout_with_cookie_and_unreachable_db_is_server_error() {
        let pool = unreachable_pool();
        let state = Arc::new(AuthState::new(AuthConfig::new(
            "http://localhost:8080".to_string(),
        )));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("portero_session=abc"),
        );
        let response = logout(Extension(pool), Extension(state), headers)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
