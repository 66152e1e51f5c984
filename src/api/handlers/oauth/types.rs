//! Wire types for the OAuth2 endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Query parameters for `GET /authorize`.
#[derive(Deserialize, Debug)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// Form body for the login submission on `POST /authorize`.
///
/// Carries the original authorization request as hidden fields so the flow
/// can resume after authentication.
#[derive(Deserialize, Debug)]
pub struct LoginForm {
    pub identifier: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// Form body for `POST /authorize/consent`.
#[derive(Deserialize, Debug)]
pub struct ConsentForm {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub approve: Option<String>,
}

/// Form body for `POST /token`.
#[derive(ToSchema, Deserialize, Debug)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

/// Successful token exchange response.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// RFC 6749 error body for failed token exchanges.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenError {
    pub(crate) fn new(error: &str, description: &str) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_serializes_rfc_field_names() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 604_800,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["access_token"], "a");
        assert_eq!(json["refresh_token"], "r");
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["expires_in"], 604_800);
    }

    #[test]
    fn token_error_omits_empty_description() {
        let error = TokenError {
            error: "invalid_grant".to_string(),
            error_description: None,
        };
        let json = serde_json::to_value(&error).unwrap();
        assert!(json.get("error_description").is_none());
    }

    #[test]
    fn token_request_tolerates_missing_fields() {
        let request: TokenRequest =
            serde_json::from_value(serde_json::json!({"grant_type": "authorization_code"}))
                .unwrap();
        assert_eq!(request.grant_type.as_deref(), Some("authorization_code"));
        assert!(request.code.is_none());
        assert!(request.client_secret.is_none());
    }
}
