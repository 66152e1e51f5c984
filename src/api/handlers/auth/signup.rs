//! Sign-up initiation: create an unverified user and email a verification
//! code.

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
use super::storage::{self, SignupOutcome};
use super::types::{SignupRequest, SignupResponse, SignupResultCode};
use super::utils::{generate_salt, hash_passphrase, normalize_email, valid_email};
use crate::api::email::EmailSender;

const DEFAULT_LOCALE: &str = "en";

/// Start the sign-up flow for a new account.
///
/// Business failures come back as HTTP 200 with a result code; only a missing
/// or invalid bearer token is a non-200 response.
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Result code in body", body = SignupResponse),
        (status = 403, description = "Bearer authentication failed")
    ),
    tag = "account"
)]
pub async fn signup(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Extension(email_sender): Extension<Arc<dyn EmailSender>>,
    headers: HeaderMap,
    Json(request): Json<SignupRequest>,
) -> Response {
    if let Err(rejection) = require_bearer(state.config(), &headers) {
        return rejection.into_response();
    }

    match process_signup(&pool, email_sender.as_ref(), &request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("Sign-up failed: {err}");
            (
                StatusCode::OK,
                Json(SignupResponse {
                    result_code: SignupResultCode::ServerError,
                    message: "Something went wrong, please try again later".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn process_signup(
    pool: &PgPool,
    email_sender: &dyn EmailSender,
    request: &SignupRequest,
) -> Result<SignupResponse> {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Ok(SignupResponse {
            result_code: SignupResultCode::InvalidEmail,
            message: "Enter a valid email address".to_string(),
        });
    }

    if request.is_consent != Some(true) {
        return Ok(SignupResponse {
            result_code: SignupResultCode::ConsentRequired,
            message: "Accept the terms of service to continue".to_string(),
        });
    }

    let locale = request.locale.as_deref().unwrap_or(DEFAULT_LOCALE);
    let salt = generate_salt()?;
    let pass_hash = hash_passphrase(&request.passphrase, &salt);

    let mut tx = pool.begin().await?;
    match storage::insert_user(&mut tx, &email, &pass_hash, &salt, locale).await? {
        SignupOutcome::EmailTaken => {
            tx.rollback().await?;
            Ok(SignupResponse {
                result_code: SignupResultCode::EmailAlreadyRegistered,
                message: "This email address is already registered".to_string(),
            })
        }
        SignupOutcome::Created { user_id, pin } => {
            let code = storage::reuse_or_create_verification_token(
                &mut tx,
                user_id,
                request.verification_code.as_deref(),
            )
            .await?;
            tx.commit().await?;

            email_sender.send(
                &email,
                "signup_verification",
                &serde_json::json!({
                    "code": code,
                    "pin": pin,
                    "locale": locale,
                }),
            );

            Ok(SignupResponse {
                result_code: SignupResultCode::Ok,
                message: "Check your inbox for the verification code".to_string(),
            })
        }
    }
}
