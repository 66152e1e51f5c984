//! Profile editing behind a one-time emailed token: init, load, save.

use anyhow::Result;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::bearer::require_bearer;
use super::state::AuthState;
use super::storage::{self, TokenType};
use super::types::{
    ProfileLoadRequest, ProfileLoadResponse, ProfileResultCode, ProfileSaveRequest,
    ProfileSaveResponse, ProfileUpdateInitRequest, ProfileUpdateInitResponse,
};
use super::utils::{normalize_email, valid_email};
use crate::api::email::EmailSender;

/// Start a profile edit: email a one-time link to the given address.
///
/// The result code is OK whether or not the address is registered, so the
/// endpoint cannot be used to probe for accounts.
#[utoipa::path(
    post,
    path = "/v1/profile/update-init",
    request_body = ProfileUpdateInitRequest,
    responses(
        (status = 200, description = "Result code in body", body = ProfileUpdateInitResponse),
        (status = 403, description = "Bearer authentication failed")
    ),
    tag = "profile"
)]
pub async fn update_init(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Extension(email_sender): Extension<Arc<dyn EmailSender>>,
    headers: HeaderMap,
    Json(request): Json<ProfileUpdateInitRequest>,
) -> Response {
    if let Err(rejection) = require_bearer(state.config(), &headers) {
        return rejection.into_response();
    }

    let base_url = state.config().base_url().to_string();
    match process_update_init(&pool, email_sender.as_ref(), &base_url, &request.email).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("Profile update init failed: {err}");
            let (result_code, message) = server_error_parts();
            (
                StatusCode::OK,
                Json(ProfileUpdateInitResponse {
                    result_code,
                    message,
                }),
            )
                .into_response()
        }
    }
}

async fn process_update_init(
    pool: &PgPool,
    email_sender: &dyn EmailSender,
    base_url: &str,
    email: &str,
) -> Result<ProfileUpdateInitResponse> {
    let email = normalize_email(email);
    let response = ProfileUpdateInitResponse {
        result_code: ProfileResultCode::Ok,
        message: "If this address is registered, an edit link is on its way".to_string(),
    };

    if !valid_email(&email) {
        return Ok(response);
    }

    let Some(user) = storage::lookup_user_by_email(pool, &email).await? else {
        return Ok(response);
    };

    let mut tx = pool.begin().await?;
    let code = storage::insert_one_time_token(&mut tx, user.id, TokenType::ProfileEdit).await?;
    tx.commit().await?;

    email_sender.send(
        &email,
        "profile_edit",
        &serde_json::json!({
            "code": code,
            "url": format!("{base_url}/profile?code={code}"),
            "locale": user.locale,
        }),
    );

    Ok(response)
}

/// Load the editable profile fields for a valid profile-edit code.
///
/// Read-only: the code stays redeemable until Save consumes it.
#[utoipa::path(
    post,
    path = "/v1/profile/load",
    request_body = ProfileLoadRequest,
    responses(
        (status = 200, description = "Result code in body", body = ProfileLoadResponse),
        (status = 403, description = "Bearer authentication failed")
    ),
    tag = "profile"
)]
pub async fn load(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Json(request): Json<ProfileLoadRequest>,
) -> Response {
    if let Err(rejection) = require_bearer(state.config(), &headers) {
        return rejection.into_response();
    }

    match process_load(&pool, &request.code).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("Profile load failed: {err}");
            let (result_code, message) = server_error_parts();
            (
                StatusCode::OK,
                Json(ProfileLoadResponse {
                    result_code,
                    message,
                    email: None,
                    locale: None,
                }),
            )
                .into_response()
        }
    }
}

async fn process_load(pool: &PgPool, code: &str) -> Result<ProfileLoadResponse> {
    let Some((email, locale)) = storage::lookup_profile_by_token(pool, code).await? else {
        return Ok(ProfileLoadResponse {
            result_code: ProfileResultCode::InvalidToken,
            message: "This edit link is invalid or was already used".to_string(),
            email: None,
            locale: None,
        });
    };

    Ok(ProfileLoadResponse {
        result_code: ProfileResultCode::Ok,
        message: String::new(),
        email: Some(email),
        locale: Some(locale),
    })
}

/// Apply profile edits and consume the one-time code.
///
/// A second Save with the same code, or a code of the wrong type, reports an
/// invalid token.
#[utoipa::path(
    post,
    path = "/v1/profile/save",
    request_body = ProfileSaveRequest,
    responses(
        (status = 200, description = "Result code in body", body = ProfileSaveResponse),
        (status = 400, description = "Malformed email"),
        (status = 403, description = "Bearer authentication failed")
    ),
    tag = "profile"
)]
pub async fn save(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Json(request): Json<ProfileSaveRequest>,
) -> Response {
    if let Err(rejection) = require_bearer(state.config(), &headers) {
        return rejection.into_response();
    }

    let new_email = request.email.as_deref().map(normalize_email);
    if let Some(email) = &new_email {
        if !valid_email(email) {
            return (StatusCode::BAD_REQUEST, "Invalid email address".to_string()).into_response();
        }
    }

    match process_save(&pool, &request.code, new_email.as_deref(), request.locale.as_deref()).await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("Profile save failed: {err}");
            let (result_code, message) = server_error_parts();
            (
                StatusCode::OK,
                Json(ProfileSaveResponse {
                    result_code,
                    message,
                }),
            )
                .into_response()
        }
    }
}

async fn process_save(
    pool: &PgPool,
    code: &str,
    email: Option<&str>,
    locale: Option<&str>,
) -> Result<ProfileSaveResponse> {
    let mut tx = pool.begin().await?;

    let Some(user_id) =
        storage::consume_one_time_token(&mut tx, code, TokenType::ProfileEdit).await?
    else {
        tx.rollback().await?;
        return Ok(ProfileSaveResponse {
            result_code: ProfileResultCode::InvalidToken,
            message: "This edit link is invalid or was already used".to_string(),
        });
    };

    if storage::update_user_profile(&mut tx, user_id, email, locale).await? {
        tx.commit().await?;
        Ok(ProfileSaveResponse {
            result_code: ProfileResultCode::Ok,
            message: "Your profile was updated".to_string(),
        })
    } else {
        tx.rollback().await?;
        Ok(ProfileSaveResponse {
            result_code: ProfileResultCode::EmailAlreadyRegistered,
            message: "This email address is already registered".to_string(),
        })
    }
}

fn server_error_parts() -> (ProfileResultCode, String) {
    (
        ProfileResultCode::ServerError,
        "Something went wrong, please try again later".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::AuthConfig;
    use axum::http::{header, HeaderValue};
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

    fn guarded_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:8080".to_string())
                .with_bearer_tokens(vec!["alpha".to_string()]),
        ))
    }

    fn bearer_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer alpha"));
        headers
    }

    #[tokio::test]
    async fn update_init_with_invalid_email_never_touches_the_db() {
        let pool = unreachable_pool();
        let response = process_update_init(
            &pool,
            &LogEmailSender,
            "http://localhost:8080",
            "not-an-email",
        )
        .await
        .unwrap();
        assert_eq!(response.result_code, ProfileResultCode::Ok);
    }

    #[tokio::test]
    async fn load_propagates_db_failure() {
        let pool = unreachable_pool();
        assert!(process_load(&pool, "code").await.is_err());
    }

    #[tokio::test]
    async fn save_propagates_db_failure() {
        let pool = unreachable_pool();
        assert!(process_save(&pool, "code", None, None).await.is_err());
    }

    #[tokio::test]
    async fn save_rejects_malformed_email_with_bad_request() {
        let pool = unreachable_pool();
        let response = save(
            Extension(pool),
            Extension(guarded_state()),
            bearer_headers(),
            Json(ProfileSaveRequest {
                code: "code".to_string(),
                email: Some("not-an-email".to_string()),
                locale: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn handlers_reject_missing_bearer() {
        let pool = unreachable_pool();
        let response = load(
            Extension(pool),
            Extension(guarded_state()),
            HeaderMap::new(),
            Json(ProfileLoadRequest {
                code: "code".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
