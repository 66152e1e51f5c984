//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes: the API
//! server by default, or administrative client registration.

use crate::cli::actions::{client, server, Action};
use crate::cli::commands::{auth, CMD_REGISTER_CLIENT};
use anyhow::{Context, Result};

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    if let Some((CMD_REGISTER_CLIENT, sub)) = matches.subcommand() {
        return Ok(Action::RegisterClient(client::Args {
            dsn,
            name: sub
                .get_one::<String>("name")
                .cloned()
                .context("missing required argument: --name")?,
            redirect_uri: sub
                .get_one::<String>("redirect-uri")
                .cloned()
                .context("missing required argument: --redirect-uri")?,
        }));
    }

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port,
        dsn,
        base_url: auth_opts.base_url,
        bearer_tokens: auth_opts.bearer_tokens,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        code_ttl_seconds: auth_opts.code_ttl_seconds,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
    }))
}
