use crate::api::handlers::auth::utils::generate_client_secret;
use crate::api::handlers::oauth::storage::insert_client;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Arguments for the register-client action.
#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub name: String,
    pub redirect_uri: String,
}

/// Register a new OAuth2 client and print its credentials.
///
/// The secret is shown exactly once; only the stored record remains afterwards.
///
/// # Errors
/// Returns an error if the database is unreachable or the insert fails.
pub async fn execute(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let (client_id, client_secret) = new_client_credentials()?;

    insert_client(
        &pool,
        &client_id,
        client_secret.expose_secret(),
        &args.name,
        &args.redirect_uri,
    )
    .await
    .context("Failed to register client")?;

    info!("Registered OAuth2 client {client_id} ({})", args.name);

    println!("client_id:     {client_id}");
    println!("client_secret: {}", client_secret.expose_secret());

    Ok(())
}

fn new_client_credentials() -> Result<(String, SecretString)> {
    let client_id = Uuid::new_v4().to_string();
    let client_secret = SecretString::from(generate_client_secret()?);
    Ok((client_id, client_secret))
}
