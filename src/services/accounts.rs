//! Account / Session collaborator (component I) — §4 "Account" and "Session"
//!
//! Signup, login, logout, and the password-change-invalidates-all-sessions
//! rule (§9 open question 1). Passwords are hashed with scrypt
//! (N=32768, r=8, p=1, 32-byte output); sessions use a random cookie token
//! plus a separate request token for double-submit CSRF (§6).

use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use scrypt::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use scrypt::{Params, Scrypt};
use sqlx::PgPool;
use std::sync::LazyLock;

use crate::error::ApiError;
use crate::models::{is_valid_username, Account, Session};

/// Scrypt parameters fixed for this deployment (§GLOSSARY "Password hash").
fn scrypt_params() -> Params {
    Params::new(15, 8, 1, 32).expect("static scrypt parameters are valid")
}

/// Disposable-email domains rejected at signup; deployment data, not an
/// attempt at an exhaustive blacklist.
static BLOCKED_EMAIL_DOMAINS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@(mailinator\.com|10minutemail\.com|guerrillamail\.com)$")
        .expect("static pattern compiles")
});

fn hash_password(password: &str) -> Result<(Vec<u8>, Vec<u8>), ApiError> {
    let salt = SaltString::generate(&mut rand_core_compat());
    let hash = Scrypt
        .hash_password_customized(
            password.as_bytes(),
            None,
            None,
            scrypt_params().into(),
            &salt,
        )
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hash: {e}")))?;
    let output = hash
        .hash
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("scrypt produced no output")))?;
    Ok((salt.as_str().as_bytes().to_vec(), output.as_bytes().to_vec()))
}

fn verify_password(password: &str, salt: &[u8], expected_hash: &[u8]) -> bool {
    let Ok(salt_str) = std::str::from_utf8(salt) else {
        return false;
    };
    let Ok(salt) = SaltString::from_b64(salt_str) else {
        return false;
    };
    let Ok(hash) = Scrypt.hash_password_customized(
        password.as_bytes(),
        None,
        None,
        scrypt_params().into(),
        &salt,
    ) else {
        return false;
    };
    hash.hash.map(|h| h.as_bytes() == expected_hash).unwrap_or(false)
}

/// Adapter so `rand` 0.8's `OsRng` satisfies the `rand_core` 0.6 trait
/// bound `password_hash::rand_core::CryptoRngCore` expects.
fn rand_core_compat() -> impl scrypt::password_hash::rand_core::CryptoRngCore {
    OsRng
}

fn random_token(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Creates a new account. Rejects duplicate (case-insensitive) usernames
/// and malformed email domains (§3 Account).
pub async fn signup(
    pool: &PgPool,
    username: &str,
    password: &str,
    email: Option<&str>,
    default_verify_interval: i64,
    default_alert_delay: i64,
) -> Result<Account, ApiError> {
    if !is_valid_username(username) {
        return Err(ApiError::Malformed("invalid username".into()));
    }
    if let Some(addr) = email {
        if BLOCKED_EMAIL_DOMAINS.is_match(addr) {
            return Err(ApiError::Malformed("email domain not accepted".into()));
        }
    }

    let (salt, hash) = hash_password(password)?;
    let subscribe_key = random_token(32);

    let account = sqlx::query_as!(
        Account,
        r#"
        INSERT INTO accounts (
            username, password_salt, password_hash, subscribe_key,
            verify_interval, alert_delay, email, created_at
        )
        VALUES (lower($1), $2, $3, $4, $5, $6, $7, $8)
        RETURNING user_id, username, password_salt, password_hash,
            subscribe_key, verify_interval, alert_delay, email,
            created_at, deletion_time
        "#,
        username,
        salt,
        hash,
        subscribe_key,
        default_verify_interval,
        default_alert_delay,
        email,
        Utc::now(),
    )
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => ApiError::Conflict,
        _ => ApiError::Database(e),
    })?;

    Ok(account)
}

/// Verifies credentials and issues a new session (§4 Session).
pub async fn login(pool: &PgPool, username: &str, password: &str, session_ttl_secs: i64) -> Result<Session, ApiError> {
    let account = sqlx::query_as!(
        Account,
        r#"
        SELECT user_id, username, password_salt, password_hash, subscribe_key,
            verify_interval, alert_delay, email, created_at, deletion_time
        FROM accounts WHERE username = lower($1)
        "#,
        username,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::Unauthenticated)?;

    if account.is_deleted() {
        return Err(ApiError::Unauthenticated);
    }
    if !verify_password(password, &account.password_salt, &account.password_hash) {
        return Err(ApiError::Unauthenticated);
    }

    issue_session(pool, account.user_id, session_ttl_secs).await
}

async fn issue_session(pool: &PgPool, user_id: i64, ttl_secs: i64) -> Result<Session, ApiError> {
    let cookie_token = random_token(32);
    let request_token = random_token(32);
    let expiry = Utc::now() + Duration::seconds(ttl_secs);

    let session = sqlx::query_as!(
        Session,
        r#"
        INSERT INTO sessions (user_id, cookie_token, request_token, expiry_time)
        VALUES ($1, $2, $3, $4)
        RETURNING session_id, user_id, cookie_token, request_token, expiry_time
        "#,
        user_id,
        cookie_token,
        request_token,
        expiry,
    )
    .fetch_one(pool)
    .await?;

    Ok(session)
}

/// Deletes one session (logout).
pub async fn logout(pool: &PgPool, session_id: i64) -> Result<(), ApiError> {
    sqlx::query!("DELETE FROM sessions WHERE session_id = $1", session_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes every session belonging to a user (logout-everywhere, and the
/// mandatory sweep on password change — §9 open question 1).
pub async fn logout_everywhere(pool: &PgPool, user_id: i64) -> Result<(), ApiError> {
    sqlx::query!("DELETE FROM sessions WHERE user_id = $1", user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Changes a user's password, invalidating every existing session
/// (§9 open question 1: resolved as bulk session invalidation).
pub async fn change_password(pool: &PgPool, user_id: i64, new_password: &str) -> Result<(), ApiError> {
    let (salt, hash) = hash_password(new_password)?;
    let mut tx = pool.begin().await?;

    sqlx::query!(
        "UPDATE accounts SET password_salt = $2, password_hash = $3 WHERE user_id = $1",
        user_id,
        salt,
        hash,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query!("DELETE FROM sessions WHERE user_id = $1", user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Looks up a session by its cookie token, validating expiry and the
/// double-submit request token (§6).
pub async fn authenticate(
    pool: &PgPool,
    cookie_token: &[u8],
    request_token: &[u8],
) -> Result<Session, ApiError> {
    let session = sqlx::query_as!(
        Session,
        r#"
        SELECT session_id, user_id, cookie_token, request_token, expiry_time
        FROM sessions WHERE cookie_token = $1
        "#,
        cookie_token,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::Unauthenticated)?;

    if session.is_expired(Utc::now()) {
        sqlx::query!("DELETE FROM sessions WHERE session_id = $1", session.session_id)
            .execute(pool)
            .await?;
        return Err(ApiError::Unauthenticated);
    }
    if session.request_token != request_token {
        return Err(ApiError::Unauthenticated);
    }

    Ok(session)
}

/// Rotates an account's subscribe key, used to set `strong=true` on
/// `/verify` (§6, §GLOSSARY "Subscribe key").
pub async fn rotate_subscribe_key(pool: &PgPool, user_id: i64) -> Result<Vec<u8>, ApiError> {
    let new_key = random_token(32);
    sqlx::query!(
        "UPDATE accounts SET subscribe_key = $2 WHERE user_id = $1",
        user_id,
        new_key,
    )
    .execute(pool)
    .await?;
    Ok(new_key)
}
