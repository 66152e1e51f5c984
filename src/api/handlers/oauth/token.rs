//! OAuth2 token endpoint: redeem an authorization code for an access and
//! refresh token pair.

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::storage;
use super::types::{TokenError, TokenRequest, TokenResponse};
use crate::api::handlers::auth::AuthState;

#[derive(Debug)]
struct ValidatedRequest {
    code: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

enum ExchangeOutcome {
    Issued(TokenResponse),
    Rejected(StatusCode, TokenError),
}

/// Exchange an authorization code for tokens.
///
/// The code is consumed inside the transaction: a rejected exchange rolls the
/// deletion back except when the code has expired, and a committed exchange
/// makes any replay of the same code fail.
#[utoipa::path(
    post,
    path = "/token",
    responses(
        (status = 200, description = "Token pair issued", body = TokenResponse),
        (status = 400, description = "Invalid request or grant", body = TokenError),
        (status = 401, description = "Client authentication failed", body = TokenError),
        (status = 500, description = "Server error", body = TokenError)
    ),
    tag = "oauth"
)]
pub async fn token(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Form(request): Form<TokenRequest>,
) -> Response {
    let validated = match validate_request(request) {
        Ok(validated) => validated,
        Err((status, error)) => return no_store((status, Json(error)).into_response()),
    };

    let ttl = state.config().access_token_ttl_seconds();
    match exchange(&pool, &validated, ttl).await {
        Ok(ExchangeOutcome::Issued(response)) => {
            no_store((StatusCode::OK, Json(response)).into_response())
        }
        Ok(ExchangeOutcome::Rejected(status, error)) => {
            no_store((status, Json(error)).into_response())
        }
        Err(err) => {
            error!("Token exchange failed: {err}");
            no_store(
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(TokenError::new("server_error", "Please try again later")),
                )
                    .into_response(),
            )
        }
    }
}

/// Token responses must never be cached.
fn no_store(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
        .headers_mut()
        .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

fn validate_request(request: TokenRequest) -> Result<ValidatedRequest, (StatusCode, TokenError)> {
    match request.grant_type.as_deref() {
        Some("authorization_code") => {}
        Some(other) => {
            return Err((
                StatusCode::BAD_REQUEST,
                TokenError::new(
                    "unsupported_grant_type",
                    &format!("Grant type {other} is not supported"),
                ),
            ))
        }
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                TokenError::new("invalid_request", "Missing grant_type"),
            ))
        }
    }

    let code = request.code.filter(|code| !code.is_empty());
    let client_id = request.client_id.filter(|id| !id.is_empty());
    let client_secret = request.client_secret.filter(|secret| !secret.is_empty());
    let redirect_uri = request.redirect_uri.filter(|uri| !uri.is_empty());

    match (code, client_id, client_secret, redirect_uri) {
        (Some(code), Some(client_id), Some(client_secret), Some(redirect_uri)) => {
            Ok(ValidatedRequest {
                code,
                client_id,
                client_secret,
                redirect_uri,
            })
        }
        _ => Err((
            StatusCode::BAD_REQUEST,
            TokenError::new(
                "invalid_request",
                "code, client_id, client_secret and redirect_uri are required",
            ),
        )),
    }
}

async fn exchange(
    pool: &PgPool,
    request: &ValidatedRequest,
    access_token_ttl_seconds: i64,
) -> Result<ExchangeOutcome> {
    let mut tx = pool.begin().await?;

    let Some(code_row) = storage::consume_authorization_code(&mut tx, &request.code).await? else {
        tx.rollback().await?;
        return Ok(ExchangeOutcome::Rejected(
            StatusCode::BAD_REQUEST,
            TokenError::new("invalid_grant", "Unknown or already redeemed code"),
        ));
    };

    if code_row.expires_epoch < chrono::Utc::now().timestamp() {
        // An expired code has no further use, keep it deleted.
        tx.commit().await?;
        return Ok(ExchangeOutcome::Rejected(
            StatusCode::BAD_REQUEST,
            TokenError::new("invalid_grant", "Authorization code expired"),
        ));
    }

    if request.redirect_uri != code_row.redirect_uri {
        tx.rollback().await?;
        return Ok(ExchangeOutcome::Rejected(
            StatusCode::BAD_REQUEST,
            TokenError::new("invalid_grant", "redirect_uri mismatch"),
        ));
    }

    let Some(client) = storage::lookup_client(pool, &request.client_id).await? else {
        tx.rollback().await?;
        return Ok(ExchangeOutcome::Rejected(
            StatusCode::UNAUTHORIZED,
            TokenError::new("invalid_client", "Unknown client"),
        ));
    };

    if client.client_secret != request.client_secret {
        tx.rollback().await?;
        return Ok(ExchangeOutcome::Rejected(
            StatusCode::UNAUTHORIZED,
            TokenError::new("invalid_client", "Client authentication failed"),
        ));
    }

    if client.id != code_row.client_id {
        tx.rollback().await?;
        return Ok(ExchangeOutcome::Rejected(
            StatusCode::BAD_REQUEST,
            TokenError::new("invalid_grant", "Code was issued to a different client"),
        ));
    }

    let (access_token, refresh_token) = storage::insert_token_pair(
        &mut tx,
        client.id,
        code_row.user_id,
        code_row.scope.as_deref(),
        access_token_ttl_seconds,
    )
    .await?;
    tx.commit().await?;

    Ok(ExchangeOutcome::Issued(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: access_token_ttl_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn form(
        grant_type: Option<&str>,
        code: Option<&str>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> TokenRequest {
        TokenRequest {
            grant_type: grant_type.map(ToString::to_string),
            code: code.map(ToString::to_string),
            client_id: client_id.map(ToString::to_string),
            client_secret: client_secret.map(ToString::to_string),
            redirect_uri: Some("https://client.example/cb".to_string()),
        }
    }

    #[test]
    fn missing_grant_type_is_invalid_request() {
        let err = validate_request(form(None, Some("c"), Some("id"), Some("s"))).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1.error, "invalid_request");
    }

    #[test]
    fn unknown_grant_type_is_unsupported() {
        let err =
            validate_request(form(Some("password"), Some("c"), Some("id"), Some("s"))).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1.error, "unsupported_grant_type");
    }

    #[test]
    fn missing_credentials_are_invalid_request() {
        let err = validate_request(form(Some("authorization_code"), Some("c"), None, Some("s")))
            .unwrap_err();
        assert_eq!(err.1.error, "invalid_request");

        let err = validate_request(form(Some("authorization_code"), Some(""), Some("id"), Some("s")))
            .unwrap_err();
        assert_eq!(err.1.error, "invalid_request");
    }

    #[test]
    fn missing_redirect_uri_is_invalid_request() {
        let mut request = form(Some("authorization_code"), Some("c"), Some("id"), Some("s"));
        request.redirect_uri = None;
        let err = validate_request(request).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(err.1.error, "invalid_request");

        let mut request = form(Some("authorization_code"), Some("c"), Some("id"), Some("s"));
        request.redirect_uri = Some(String::new());
        let err = validate_request(request).unwrap_err();
        assert_eq!(err.1.error, "invalid_request");
    }

    #[test]
    fn complete_request_validates() {
        let validated =
            validate_request(form(Some("authorization_code"), Some("c"), Some("id"), Some("s")))
                .unwrap();
        assert_eq!(validated.code, "c");
        assert_eq!(validated.client_id, "id");
        assert_eq!(validated.client_secret, "s");
        assert_eq!(validated.redirect_uri, "https://client.example/cb");
    }

    #[tokio::test]
    async fn exchange_propagates_db_failure() {
        let pool = unreachable_pool();
        let request = ValidatedRequest {
            code: "c".to_string(),
            client_id: "id".to_string(),
            client_secret: "s".to_string(),
            redirect_uri: "https://client.example/cb".to_string(),
        };
        assert!(exchange(&pool, &request, 604_800).await.is_err());
    }

    #[tokio::test]
    async fn handler_maps_db_failure_to_server_error() {
        let pool = unreachable_pool();
        let state = Arc::new(AuthState::new(
            crate::api::handlers::auth::AuthConfig::new("http://localhost:8080".to_string()),
        ));
        let response = token(
            Extension(pool),
            Extension(state),
            Form(form(Some("authorization_code"), Some("c"), Some("id"), Some("s"))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
    }
}
