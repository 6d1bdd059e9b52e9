//! Attestation history row model — §3 "Attestation (history row)"
//!
//! Append-only: rows are never updated or deleted except by the Maintenance
//! Loop's retention-horizon GC on devices that have been soft-deleted.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AttestationRow {
    pub id: i64,
    pub fingerprint: Vec<u8>,
    pub time: DateTime<Utc>,
    pub strong: bool,
    pub tee_enforced: String,
    pub os_enforced: String,
}
