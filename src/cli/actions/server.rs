use crate::api;
use crate::api::handlers::auth::AuthConfig;
use anyhow::{Context, Result};
use url::Url;

/// Arguments for the server action.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub base_url: String,
    pub bearer_tokens: Vec<String>,
    pub session_ttl_seconds: i64,
    pub code_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the base URL is invalid, the database is unreachable,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    Url::parse(&args.base_url).with_context(|| format!("Invalid base URL: {}", args.base_url))?;

    let auth_config = AuthConfig::new(args.base_url)
        .with_bearer_tokens(args.bearer_tokens)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_code_ttl_seconds(args.code_ttl_seconds)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds);

    api::new(args.port, args.dsn, auth_config).await?;

    Ok(())
}
