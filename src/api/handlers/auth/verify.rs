//! Email verification: redeem the one-time code and activate the account.

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
use super::types::{VerifyEmailRequest, VerifyEmailResponse, VerifyResultCode};

/// Redeem an email-verification code.
///
/// The code is consumed and the account activated in one transaction, so a
/// second redemption of the same code reports an invalid token.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Result code in body", body = VerifyEmailResponse),
        (status = 403, description = "Bearer authentication failed")
    ),
    tag = "account"
)]
pub async fn verify_email(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Json(request): Json<VerifyEmailRequest>,
) -> Response {
    if let Err(rejection) = require_bearer(state.config(), &headers) {
        return rejection.into_response();
    }

    match process_verify(&pool, &request.code).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("Email verification failed: {err}");
            (
                StatusCode::OK,
                Json(VerifyEmailResponse {
                    result_code: VerifyResultCode::ServerError,
                    message: "Something went wrong, please try again later".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn process_verify(pool: &PgPool, code: &str) -> Result<VerifyEmailResponse> {
    let mut tx = pool.begin().await?;

    let Some(user_id) =
        storage::consume_one_time_token(&mut tx, code, TokenType::EmailVerification).await?
    else {
        tx.rollback().await?;
        return Ok(VerifyEmailResponse {
            result_code: VerifyResultCode::InvalidToken,
            message: "This verification link is invalid or was already used".to_string(),
        });
    };

    storage::activate_user(&mut tx, user_id).await?;
    tx.commit().await?;

    Ok(VerifyEmailResponse {
        result_code: VerifyResultCode::Ok,
        message: "Your email address is verified, you can now sign in".to_string(),
    })
}
