//! Auth state and configuration.

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    session_cookie_secure: bool,
    session_ttl_seconds: i64,
    code_ttl_seconds: i64,
    access_token_ttl_seconds: i64,
    bearer_tokens: Vec<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        // Only mark cookies Secure when the public URL is served over HTTPS.
        let secure = base_url.starts_with("https://");

        Self {
            base_url,
            session_cookie_secure: secure,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            bearer_tokens: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_bearer_tokens(mut self, tokens: Vec<String>) -> Self {
        self.bearer_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl_seconds
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    pub(crate) fn bearer_tokens(&self) -> &[String] {
        &self.bearer_tokens
    }
}

/// Shared auth state handed to handlers via `Extension`.
#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}
