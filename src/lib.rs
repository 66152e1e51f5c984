//! # Portero (OAuth2 Authorization Server)
//!
//! `portero` is a small but complete OAuth2 provider implementing the
//! authorization-code grant with session-based interactive login.
//!
//! ## Flows
//!
//! - **Authorization**: `GET /authorize` renders a login form (or the consent
//!   page when a session cookie is present); a successful login establishes a
//!   session and redirects back to re-enter the consent branch. The consent
//!   handler issues a short-lived authorization code.
//! - **Token exchange**: `POST /token` redeems an authorization code together
//!   with client credentials for an access/refresh token pair. Codes are
//!   consumed on first redemption.
//! - **Registration**: JSON endpoints handle sign-up, email verification, and
//!   profile edits backed by single-use tokens. Business results ride HTTP 200
//!   with a machine-readable `resultCode`; only transport/auth failures use
//!   non-200 statuses.
//!
//! ## Credentials
//!
//! Users authenticate with a 4-digit PIN (or email) and a passphrase. The
//! stored hash is a single salted SHA-256 pass over the normalized passphrase,
//! kept for compatibility with existing records. Session and one-time token
//! values are random; the database stores only their hashes.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
