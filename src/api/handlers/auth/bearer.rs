//! Bearer token guard for the machine-to-machine endpoints.

use axum::http::{HeaderMap, StatusCode};
use tracing::warn;

use super::state::AuthConfig;
use super::utils::extract_bearer_token;

/// Require a configured bearer token on the request.
///
/// An empty configured list denies everything; the caller must provision at
/// least one token before the v1 surface is usable. Rejections are logged and
/// answered with 403, never raised.
pub(crate) fn require_bearer(
    config: &AuthConfig,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, String)> {
    let Some(token) = extract_bearer_token(headers) else {
        warn!("Rejected request without bearer token");
        return Err((StatusCode::FORBIDDEN, "Missing bearer token".to_string()));
    };

    if config.bearer_tokens().iter().any(|known| *known == token) {
        Ok(())
    } else {
        warn!("Rejected request with unknown bearer token");
        Err((StatusCode::FORBIDDEN, "Invalid bearer token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    fn config_with(tokens: &[&str]) -> AuthConfig {
        AuthConfig::new("http://localhost:8080".to_string())
            .with_bearer_tokens(tokens.iter().map(ToString::to_string).collect())
    }

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn accepts_known_token() {
        let config = config_with(&["alpha", "beta"]);
        assert!(require_bearer(&config, &headers_with("Bearer beta")).is_ok());
    }

    #[test]
    fn rejects_unknown_token() {
        let config = config_with(&["alpha"]);
        let err = require_bearer(&config, &headers_with("Bearer nope")).unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[test]
    fn rejects_missing_header() {
        let config = config_with(&["alpha"]);
        let err = require_bearer(&config, &HeaderMap::new()).unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
        assert_eq!(err.1, "Missing bearer token");
    }

    #[test]
    fn empty_configuration_denies_all() {
        let config = config_with(&[]);
        let err = require_bearer(&config, &headers_with("Bearer anything")).unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }
}
