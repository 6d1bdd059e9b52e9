//! Alert Dispatcher (component E) — §4.4 "Alert Dispatcher"
//!
//! Periodically scans pinned, non-deleted devices whose owning account has
//! an email on file, and emails an expired or recovered notice whenever a
//! device crosses its `alertDelay` threshold since `verifiedTimeLast`,
//! rate-limited to one email per device per threshold crossing.

use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use crate::services::mailer::Mailer;

struct AlertCandidate {
    fingerprint: Vec<u8>,
    email: String,
    verified_time_last: chrono::DateTime<Utc>,
    expired_time_last: Option<chrono::DateTime<Utc>>,
    alert_delay: i64,
}

/// Runs one pass: finds devices whose silence has crossed `alert_delay`
/// and have not yet been notified for this crossing, and devices that were
/// previously notified but have since checked in again (recovery).
pub async fn run_once(pool: &PgPool, mailer: &dyn Mailer, from_address: &str) -> Result<usize, sqlx::Error> {
    let now = Utc::now();

    let candidates = sqlx::query_as!(
        AlertCandidate,
        r#"
        SELECT
            d.fingerprint, a.email as "email!", d.verified_time_last,
            d.expired_time_last, a.alert_delay
        FROM devices d
        JOIN accounts a ON a.user_id = d.user_id
        WHERE d.deletion_time IS NULL
          AND a.deletion_time IS NULL
          AND a.email IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut notified = 0usize;

    for candidate in candidates {
        let silence = now - candidate.verified_time_last;
        let is_expired = silence > chrono::Duration::seconds(candidate.alert_delay);
        let already_notified = candidate.expired_time_last.is_some();

        if is_expired && !already_notified {
            let subject = "Device has stopped verifying";
            let body = format!(
                "A pinned device ({}) has not completed attestation in over {} seconds.",
                hex::encode(&candidate.fingerprint),
                candidate.alert_delay
            );
            if mailer.send(&candidate.email, subject, &body).await.is_ok() {
                sqlx::query!(
                    "UPDATE devices SET expired_time_last = $2 WHERE fingerprint = $1",
                    candidate.fingerprint,
                    now,
                )
                .execute(pool)
                .await?;
                notified += 1;
            } else {
                tracing::warn!(from = from_address, "alert email delivery failed");
            }
        } else if !is_expired && already_notified {
            let subject = "Device has resumed verifying";
            let body = format!(
                "A previously silent device ({}) has successfully attested again.",
                hex::encode(&candidate.fingerprint)
            );
            if mailer.send(&candidate.email, subject, &body).await.is_ok() {
                sqlx::query!(
                    "UPDATE devices SET expired_time_last = NULL WHERE fingerprint = $1",
                    candidate.fingerprint,
                )
                .execute(pool)
                .await?;
                notified += 1;
            }
        }
    }

    Ok(notified)
}

/// Spawns the periodic dispatcher task, matching this codebase's existing
/// `spawn_cleanup_task` idiom (§4.1).
pub fn spawn(pool: PgPool, mailer: Arc<dyn Mailer>, from_address: String, tick_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(tick_secs));
        loop {
            interval.tick().await;
            match run_once(&pool, mailer.as_ref(), &from_address).await {
                Ok(n) if n > 0 => tracing::info!(notified = n, "alert dispatcher sent notices"),
                Ok(_) => {}
                Err(error) => tracing::error!(%error, "alert dispatcher pass failed"),
            }
        }
    })
}
