//! Database helpers for users, sessions, and one-time tokens.

use anyhow::{anyhow, Context, Result};
use sqlx::{Acquire, PgPool, Row};
use std::net::IpAddr;
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{
    generate_pin, generate_token, hash_passphrase, hash_token, is_unique_violation,
    violated_constraint,
};

/// Fixed error for the forbidden one-time token update path.
pub(crate) const TOKEN_IMMUTABLE_ERROR: &str =
    "one-time tokens are immutable; delete and create a new one";

const PIN_ALLOCATION_ATTEMPTS: usize = 10;

/// Purpose bound to a one-time token at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenType {
    EmailVerification,
    ProfileEdit,
    AccountUnlock,
}

impl TokenType {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::ProfileEdit => "profile_edit",
            Self::AccountUnlock => "account_unlock",
        }
    }
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(crate) enum SignupOutcome {
    Created { user_id: Uuid, pin: String },
    EmailTaken,
}

pub(crate) struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) pass_hash: String,
    pub(crate) pass_salt: String,
    pub(crate) pin: String,
    pub(crate) status: String,
    pub(crate) locale: String,
}

/// Minimal data returned for a valid session cookie.
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
}

pub(crate) struct OneTimeTokenRecord {
    pub(crate) user_id: Uuid,
    pub(crate) token_type: String,
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        pass_hash: row.get("pass_hash"),
        pass_salt: row.get("pass_salt"),
        pin: row.get("pin"),
        status: row.get("status"),
        locale: row.get("locale"),
    }
}

const USER_COLUMNS: &str =
    "id, email, pass_hash, pass_salt, pin, status::text AS status, locale";

pub(crate) async fn lookup_user_by_pin(pool: &PgPool, pin: &str) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE pin = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(pin)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by pin")?;
    Ok(row.as_ref().map(row_to_user))
}

pub(crate) async fn lookup_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;
    Ok(row.as_ref().map(row_to_user))
}

/// Credential check: resolve the identifier, recompute the salted hash, and
/// require an active account. Every failure mode collapses to `None` so the
/// caller cannot distinguish unknown identifiers from bad passphrases.
pub(crate) async fn load_user(
    pool: &PgPool,
    identifier: &str,
    passphrase: &str,
) -> Result<Option<UserRecord>> {
    let user = if is_pin(identifier) {
        lookup_user_by_pin(pool, identifier).await?
    } else {
        lookup_user_by_email(pool, &super::utils::normalize_email(identifier)).await?
    };

    Ok(user.filter(|user| {
        user.status == "active" && hash_passphrase(passphrase, &user.pass_salt) == user.pass_hash
    }))
}

pub(crate) fn is_pin(identifier: &str) -> bool {
    identifier.len() == 4 && identifier.chars().all(|c| c.is_ascii_digit())
}

/// Insert a new unverified user with a freshly allocated PIN.
///
/// Candidate PINs are drawn by rejection sampling: check, insert, and retry on
/// a PIN collision. The UNIQUE constraint is the safety net for the window
/// between check and insert. Each attempt runs in a savepoint so a constraint
/// error does not abort the surrounding transaction before the retry.
pub(crate) async fn insert_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    pass_hash: &str,
    pass_salt: &str,
    locale: &str,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO users (email, pass_hash, pass_salt, pin, locale)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
    ";

    for _ in 0..PIN_ALLOCATION_ATTEMPTS {
        let pin = generate_pin()?;
        let mut attempt = tx.begin().await.context("failed to open savepoint")?;

        if pin_in_use(&mut attempt, &pin).await? {
            attempt.rollback().await?;
            continue;
        }

        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .bind(pass_hash)
            .bind(pass_salt)
            .bind(&pin)
            .bind(locale)
            .fetch_one(&mut *attempt)
            .instrument(span)
            .await;

        match row {
            Ok(row) => {
                let user_id = row.get("id");
                attempt.commit().await?;
                return Ok(SignupOutcome::Created { user_id, pin });
            }
            Err(err) if is_unique_violation(&err) => {
                let constraint = violated_constraint(&err);
                attempt.rollback().await?;
                match constraint.as_deref() {
                    Some("users_pin_key") => {}
                    _ => return Ok(SignupOutcome::EmailTaken),
                }
            }
            Err(err) => return Err(err).context("failed to insert user"),
        }
    }

    Err(anyhow!("failed to allocate a unique pin"))
}

async fn pin_in_use(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, pin: &str) -> Result<bool> {
    let query = "SELECT 1 FROM users WHERE pin = $1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(pin)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check pin uniqueness")?;
    Ok(row.is_some())
}

/// Activate a user after email verification.
pub(crate) async fn activate_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<()> {
    let query = "UPDATE users SET status = 'active' WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to activate user")?;
    Ok(())
}

/// Apply profile edits. Returns `false` when the new email collides with an
/// existing account, leaving the transaction for the caller to roll back.
pub(crate) async fn update_user_profile(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    email: Option<&str>,
    locale: Option<&str>,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET email = COALESCE($2, email),
            locale = COALESCE($3, locale)
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(email)
        .bind(locale)
        .execute(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(true),
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err).context("failed to update user profile"),
    }
}

/// Create a session bound to the authenticated user.
///
/// Generates a random token, stores only its hash, and returns the raw value
/// so the caller can set the session cookie.
pub(crate) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ip_address: Option<IpAddr>,
    user_agent: Option<&str>,
) -> Result<String> {
    let query = r"
        INSERT INTO user_sessions (session_hash, user_id, ip_address, user_agent)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(ip_address)
            .bind(user_agent)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    // Sessions have no server-side TTL; only active users resolve.
    let query = r"
        SELECT users.id, users.email
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND users.status = 'active'
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
    }))
}

/// Refresh the ip/user-agent of a session on an authenticated hit. This is
/// the only update sessions ever receive.
pub(crate) async fn refresh_session(
    pool: &PgPool,
    token_hash: &[u8],
    ip_address: Option<IpAddr>,
    user_agent: Option<&str>,
) -> Result<()> {
    let query = r"
        UPDATE user_sessions
        SET ip_address = COALESCE($2, ip_address),
            user_agent = COALESCE($3, user_agent)
        WHERE session_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(ip_address)
        .bind(user_agent)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to refresh session")?;
    Ok(())
}

pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Create a one-time token; the raw code goes out via email, only the hash is
/// stored. Each attempt runs in a savepoint so a hash collision leaves the
/// surrounding transaction usable for the retry.
pub(crate) async fn insert_one_time_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    token_type: TokenType,
) -> Result<String> {
    let query = r"
        INSERT INTO one_time_tokens (token_hash, user_id, token_type)
        VALUES ($1, $2, $3::one_time_token_type)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let code = generate_token()?;
        let token_hash = hash_token(&code);
        let mut attempt = tx.begin().await.context("failed to open savepoint")?;
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(token_type.as_str())
            .execute(&mut *attempt)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => {
                attempt.commit().await?;
                return Ok(code);
            }
            Err(err) if is_unique_violation(&err) => {
                attempt.rollback().await?;
            }
            Err(err) => return Err(err).context("failed to insert one-time token"),
        }
    }

    Err(anyhow!("failed to generate unique one-time token"))
}

/// Reuse a still-valid verification code supplied by the caller, or mint a
/// fresh one. Retried sign-up inits keep emailing the same code this way.
pub(crate) async fn reuse_or_create_verification_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    supplied: Option<&str>,
) -> Result<String> {
    if let Some(code) = supplied {
        let query = r"
            SELECT 1 FROM one_time_tokens
            WHERE token_hash = $1
              AND user_id = $2
              AND token_type = 'email_verification'
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_token(code))
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .instrument(span)
            .await
            .context("failed to check existing verification token")?;

        if row.is_some() {
            return Ok(code.to_string());
        }
    }

    insert_one_time_token(tx, user_id, TokenType::EmailVerification).await
}

/// Single lookup, no side effect. Type semantics are the caller's concern.
pub(crate) async fn read_one_time_token(
    pool: &PgPool,
    code: &str,
) -> Result<Option<OneTimeTokenRecord>> {
    let query = r"
        SELECT user_id, token_type::text AS token_type
        FROM one_time_tokens
        WHERE token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(hash_token(code))
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to read one-time token")?;

    Ok(row.map(|row| OneTimeTokenRecord {
        user_id: row.get("user_id"),
        token_type: row.get("token_type"),
    }))
}

/// Consume a one-time token of the expected type, returning its owner.
///
/// The delete happens inside the caller's transaction, so a redemption that
/// later fails rolls the token back, and a concurrent redemption of the same
/// code sees no row.
pub(crate) async fn consume_one_time_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    code: &str,
    token_type: TokenType,
) -> Result<Option<Uuid>> {
    let query = r"
        DELETE FROM one_time_tokens
        WHERE token_hash = $1
          AND token_type = $2::one_time_token_type
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(hash_token(code))
        .bind(token_type.as_str())
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume one-time token")?;

    Ok(row.map(|row| row.get("user_id")))
}

/// One-time tokens are immutable once created; this always fails.
pub(crate) async fn update_one_time_token(
    _pool: &PgPool,
    _code: &str,
    _token_type: TokenType,
) -> Result<()> {
    Err(anyhow!(TOKEN_IMMUTABLE_ERROR))
}

/// Resolve a profile-edit code to the owning user's editable fields.
pub(crate) async fn lookup_profile_by_token(
    pool: &PgPool,
    code: &str,
) -> Result<Option<(String, String)>> {
    let query = r"
        SELECT users.email, users.locale
        FROM one_time_tokens
        JOIN users ON users.id = one_time_tokens.user_id
        WHERE one_time_tokens.token_hash = $1
          AND one_time_tokens.token_type = 'profile_edit'
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(hash_token(code))
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup profile by token")?;

    Ok(row.map(|row| (row.get("email"), row.get("locale"))))
}
