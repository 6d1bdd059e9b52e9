//! Session entity model — §3 "Session"

use chrono::{DateTime, Utc};

/// A logged-in session. `cookie_token` is set as the `__Host-` cookie value;
/// `request_token` must be echoed in the request body/header on every
/// session-authenticated call (double-submit CSRF, §6).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub session_id: i64,
    pub user_id: i64,
    pub cookie_token: Vec<u8>,
    pub request_token: Vec<u8>,
    pub expiry_time: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time < now
    }
}
