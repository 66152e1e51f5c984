use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_BEARER_TOKEN: &str = "bearer-token";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_CODE_TTL: &str = "code-ttl-seconds";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl-seconds";

/// Parsed auth-related CLI options.
#[derive(Debug)]
pub struct Options {
    pub base_url: String,
    pub bearer_tokens: Vec<String>,
    pub session_ttl_seconds: i64,
    pub code_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
}

impl Options {
    /// Extract auth options from validated matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing (programming error).
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            base_url: matches
                .get_one::<String>(ARG_BASE_URL)
                .cloned()
                .context("missing required argument: --base-url")?,
            bearer_tokens: matches
                .get_many::<String>(ARG_BEARER_TOKEN)
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL)
                .copied()
                .context("missing required argument: --session-ttl-seconds")?,
            code_ttl_seconds: matches
                .get_one::<i64>(ARG_CODE_TTL)
                .copied()
                .context("missing required argument: --code-ttl-seconds")?,
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .context("missing required argument: --access-token-ttl-seconds")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_URL)
                .long(ARG_BASE_URL)
                .help("Public base URL of this server, used for cookies and redirects")
                .default_value("http://localhost:8080")
                .env("PORTERO_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_BEARER_TOKEN)
                .long(ARG_BEARER_TOKEN)
                .help("Static bearer token allowed on the JSON API (repeatable)")
                .env("PORTERO_BEARER_TOKENS")
                .action(ArgAction::Append)
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Max-Age of the session cookie in seconds")
                .default_value("43200")
                .env("PORTERO_SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_CODE_TTL)
                .long(ARG_CODE_TTL)
                .help("Lifetime of issued authorization codes in seconds")
                .default_value("600")
                .env("PORTERO_CODE_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Lifetime of issued access tokens in seconds")
                .default_value("604800")
                .env("PORTERO_ACCESS_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
}
