//! Maintenance Loop (component F) — §4.5 "Maintenance Loop"
//!
//! Daily housekeeping: sweeps expired sessions, garbage-collects
//! attestation history belonging to devices soft-deleted past the
//! retention horizon, reclaims table bloat, and produces a timestamped
//! database backup. `VACUUM`/`ANALYZE` cannot run inside a transaction, so
//! this issues them as bare statements outside any `BEGIN` block.

use std::path::PathBuf;

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup directory could not be created: {0}")]
    Directory(#[source] std::io::Error),
    #[error("backup collaborator failed to launch: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("backup collaborator exited with status {0}")]
    ExitStatus(std::process::ExitStatus),
}

/// Backup collaborator invoked by the Maintenance Loop (§4.5: "Produces a
/// timestamped backup under the backup directory (collaborator)"). Kept
/// behind a trait, mirroring the Alert Dispatcher's `Mailer` collaborator,
/// so the loop's scheduling is testable without shelling out to `pg_dump`.
#[async_trait::async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run(&self, database_url: &str, backup_dir: &str) -> Result<PathBuf, BackupError>;
}

/// Shells out to `pg_dump`, writing a timestamped custom-format dump into
/// `backup_dir` (§4.5 implementation note: "delegated to an external
/// collaborator invoked as a logged, best-effort shell step").
pub struct PgDumpBackupRunner;

#[async_trait::async_trait]
impl BackupRunner for PgDumpBackupRunner {
    async fn run(&self, database_url: &str, backup_dir: &str) -> Result<PathBuf, BackupError> {
        tokio::fs::create_dir_all(backup_dir).await.map_err(BackupError::Directory)?;

        let file_name = format!("backup-{}.dump", Utc::now().format("%Y%m%dT%H%M%SZ"));
        let path = PathBuf::from(backup_dir).join(file_name);

        let status = tokio::process::Command::new("pg_dump")
            .arg("--format=custom")
            .arg("--file")
            .arg(&path)
            .arg(database_url)
            .status()
            .await
            .map_err(BackupError::Spawn)?;

        if !status.success() {
            return Err(BackupError::ExitStatus(status));
        }
        Ok(path)
    }
}

/// Deletes sessions whose `expiry_time` has passed.
pub async fn sweep_expired_sessions(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query!("DELETE FROM sessions WHERE expiry_time < $1", Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes attestation history rows for devices that were soft-deleted more
/// than `retention_horizon_days` ago (§4.5: "history is append-only while a
/// device is live; deletion horizon only applies after revocation").
pub async fn gc_retained_history(pool: &PgPool, retention_horizon_days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_horizon_days);
    let result = sqlx::query!(
        r#"
        DELETE FROM attestation_history
        WHERE fingerprint IN (
            SELECT fingerprint FROM devices
            WHERE deletion_time IS NOT NULL AND deletion_time < $1
        )
        "#,
        cutoff,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Reclaims storage; run outside any transaction, best-effort.
pub async fn reclaim_storage(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("VACUUM ANALYZE devices").execute(pool).await?;
    sqlx::query("VACUUM ANALYZE attestation_history").execute(pool).await?;
    sqlx::query("VACUUM ANALYZE sessions").execute(pool).await?;
    Ok(())
}

/// Runs one full maintenance pass.
pub async fn run_once(
    pool: &PgPool,
    retention_horizon_days: i64,
    backup: &dyn BackupRunner,
    database_url: &str,
    backup_dir: &str,
) {
    match sweep_expired_sessions(pool).await {
        Ok(n) if n > 0 => tracing::info!(removed = n, "maintenance: swept expired sessions"),
        Ok(_) => {}
        Err(error) => tracing::error!(%error, "maintenance: session sweep failed"),
    }

    match gc_retained_history(pool, retention_horizon_days).await {
        Ok(n) if n > 0 => tracing::info!(removed = n, "maintenance: gc'd retained history"),
        Ok(_) => {}
        Err(error) => tracing::error!(%error, "maintenance: history gc failed"),
    }

    if let Err(error) = reclaim_storage(pool).await {
        tracing::warn!(%error, "maintenance: vacuum/analyze failed");
    }

    // Best-effort: a failed backup never surfaces to a request (§7 policy,
    // "maintenance-loop errors never surface").
    match backup.run(database_url, backup_dir).await {
        Ok(path) => tracing::info!(path = %path.display(), "maintenance: backup written"),
        Err(error) => tracing::error!(%error, "maintenance: backup failed"),
    }
}

/// Spawns the daily maintenance task, matching this codebase's existing
/// `spawn_cleanup_task` idiom (§4.1).
pub fn spawn(
    pool: PgPool,
    retention_horizon_days: i64,
    tick_secs: u64,
    database_url: String,
    backup_dir: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let backup = PgDumpBackupRunner;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(tick_secs));
        loop {
            interval.tick().await;
            run_once(&pool, retention_horizon_days, &backup, &database_url, &backup_dir).await;
        }
    })
}
