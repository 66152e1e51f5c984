//! Database helpers for OAuth2 clients, authorization codes, and tokens.

use anyhow::{anyhow, Context, Result};
use sqlx::{Acquire, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::handlers::auth::utils::{generate_token, is_unique_violation};

pub(crate) struct ClientRecord {
    pub(crate) id: Uuid,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) name: String,
    pub(crate) redirect_uri: String,
}

/// Authorization code row pulled out at redemption time.
pub(crate) struct CodeRecord {
    pub(crate) client_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) redirect_uri: String,
    pub(crate) scope: Option<String>,
    pub(crate) expires_epoch: i64,
}

/// Register a new OAuth2 client. Used by the administrative CLI.
///
/// # Errors
/// Returns an error if the insert fails, including a `client_id` collision.
pub async fn insert_client(
    pool: &PgPool,
    client_id: &str,
    client_secret: &str,
    name: &str,
    redirect_uri: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO oauth_clients (client_id, client_secret, name, redirect_uri)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(client_id)
        .bind(client_secret)
        .bind(name)
        .bind(redirect_uri)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert oauth client")?;
    Ok(())
}

/// Resolve a public client identifier. Inactive clients do not resolve.
pub(crate) async fn lookup_client(
    pool: &PgPool,
    client_id: &str,
) -> Result<Option<ClientRecord>> {
    let query = r"
        SELECT id, client_id, client_secret, name, redirect_uri
        FROM oauth_clients
        WHERE client_id = $1
          AND status = 'active'
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(client_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup oauth client")?;

    Ok(row.map(|row| ClientRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        client_secret: row.get("client_secret"),
        name: row.get("name"),
        redirect_uri: row.get("redirect_uri"),
    }))
}

/// Issue an authorization code bound to a client, user, and redirect URI.
pub(crate) async fn insert_authorization_code(
    pool: &PgPool,
    client_id: Uuid,
    user_id: Uuid,
    redirect_uri: &str,
    scope: Option<&str>,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO oauth_codes (code, client_id, user_id, redirect_uri, scope, expires_at)
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let code = generate_token()?;
        let result = sqlx::query(query)
            .bind(&code)
            .bind(client_id)
            .bind(user_id)
            .bind(redirect_uri)
            .bind(scope)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(code),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert authorization code"),
        }
    }

    Err(anyhow!("failed to generate unique authorization code"))
}

/// Redeem an authorization code by deleting it and returning its row.
///
/// The delete runs inside the caller's transaction. If the exchange later
/// fails the rollback puts the code back, and two concurrent redemptions
/// cannot both see the row.
pub(crate) async fn consume_authorization_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    code: &str,
) -> Result<Option<CodeRecord>> {
    let query = r"
        DELETE FROM oauth_codes
        WHERE code = $1
        RETURNING client_id, user_id, redirect_uri, scope,
                  EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_epoch
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume authorization code")?;

    Ok(row.map(|row| CodeRecord {
        client_id: row.get("client_id"),
        user_id: row.get("user_id"),
        redirect_uri: row.get("redirect_uri"),
        scope: row.get("scope"),
        expires_epoch: row.get("expires_epoch"),
    }))
}

/// Mint an access/refresh token pair for a redeemed code.
pub(crate) async fn insert_token_pair(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    client_id: Uuid,
    user_id: Uuid,
    scope: Option<&str>,
    ttl_seconds: i64,
) -> Result<(String, String)> {
    let query = r"
        INSERT INTO oauth_tokens (access_token, refresh_token, client_id, user_id, scope, expires_at)
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let access_token = generate_token()?;
        let refresh_token = generate_token()?;
        // Savepoint per attempt: a unique violation must not abort the
        // exchange transaction that already consumed the code.
        let mut attempt = tx.begin().await.context("failed to open savepoint")?;
        let result = sqlx::query(query)
            .bind(&access_token)
            .bind(&refresh_token)
            .bind(client_id)
            .bind(user_id)
            .bind(scope)
            .bind(ttl_seconds)
            .execute(&mut *attempt)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => {
                attempt.commit().await?;
                return Ok((access_token, refresh_token));
            }
            Err(err) if is_unique_violation(&err) => {
                attempt.rollback().await?;
            }
            Err(err) => return Err(err).context("failed to insert token pair"),
        }
    }

    Err(anyhow!("failed to generate unique token pair"))
}
