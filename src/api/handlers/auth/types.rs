//! Request/response types for the JSON API.
//!
//! Business outcomes always come back as HTTP 200 with a `resultCode` plus a
//! human-readable message intended for localization upstream; only transport
//! and bearer-auth failures use non-200 statuses.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignupResultCode {
    Ok,
    ConsentRequired,
    InvalidEmail,
    EmailAlreadyRegistered,
    ServerError,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyResultCode {
    Ok,
    InvalidToken,
    ServerError,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileResultCode {
    Ok,
    InvalidToken,
    EmailAlreadyRegistered,
    ServerError,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailTestResultCode {
    Ok,
    InvalidEmail,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub passphrase: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub is_consent: Option<bool>,
    /// Client-supplied verification code to reuse on retried sign-up inits.
    #[serde(default)]
    pub verification_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub result_code: SignupResultCode,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailResponse {
    pub result_code: VerifyResultCode,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateInitRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateInitResponse {
    pub result_code: ProfileResultCode,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLoadRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLoadResponse {
    pub result_code: ProfileResultCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSaveRequest {
    pub code: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSaveResponse {
    pub result_code: ProfileResultCode,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EmailTestRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EmailTestResponse {
    pub result_code: EmailTestResultCode,
    pub message: String,
}
