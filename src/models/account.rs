//! Account entity model — §3 "Account"

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An account owning zero or more pinned devices.
///
/// `password_salt`/`password_hash` hold the scrypt(N=32768, r=8, p=1, 32)
/// verifier; `subscribe_key` is the rotatable shared secret clients present
/// on `/verify` to set `strong=true`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Account {
    pub user_id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_salt: Vec<u8>,
    #[serde(skip_serializing)]
    pub password_hash: Vec<u8>,
    #[serde(skip_serializing)]
    pub subscribe_key: Vec<u8>,
    pub verify_interval: i64,
    pub alert_delay: i64,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deletion_time: Option<DateTime<Utc>>,
}

impl Account {
    pub fn is_deleted(&self) -> bool {
        self.deletion_time.is_some()
    }
}

/// Login-name validity per §3: case-insensitive unique, `[a-zA-Z0-9]{1,32}`.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= 32
        && username.chars().all(|c| c.is_ascii_alphanumeric())
}
