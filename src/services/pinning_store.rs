//! Pinning Store (component D) — §4.3 "Pinning Store"
//!
//! First-use pinning with continuity enforcement. A fingerprint's owner,
//! certificate chain, verified-boot key, and security level are immutable
//! once pinned; the OS/patch/app-version counters may only increase. All
//! checks and the history append happen inside one serializable
//! transaction guarded by `SELECT ... FOR UPDATE` on the device row.

use chrono::Utc;
use sqlx::PgPool;

use crate::error::ApiError;
use crate::models::{Device, SecurityLevel};
use crate::services::attestation_verifier::AttestationReport;

/// Result of a successful `record` call.
#[derive(Debug)]
pub enum Outcome {
    /// First sighting of this fingerprint; a new row was inserted.
    Enrolled(Device),
    /// Fingerprint already pinned and every check passed; counters updated.
    Verified(Device),
}

/// Runs the ordered check sequence (owner, deletion, immutable fields,
/// monotonic counters) and persists the outcome, inside a single
/// transaction (§4.3 step 5, §5 locking note).
pub async fn record(
    pool: &PgPool,
    report: &AttestationReport,
    user_id: i64,
    strong: bool,
) -> Result<Outcome, ApiError> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as!(
        Device,
        r#"
        SELECT
            fingerprint, pinned_certificate_0, pinned_certificate_1,
            pinned_certificate_2, pinned_certificate_3,
            pinned_verified_boot_key, verified_boot_hash,
            pinned_os_version, pinned_os_patch_level,
            pinned_vendor_patch_level, pinned_boot_patch_level,
            pinned_app_version,
            pinned_security_level as "pinned_security_level: SecurityLevel",
            user_profile_secure, enrolled_biometrics, accessibility,
            adb_enabled, add_users_when_locked, deny_new_usb,
            oem_unlock_allowed, system_user, device_admin,
            user_id, verified_time_first, verified_time_last,
            expired_time_last, failure_time_last, deletion_time
        FROM devices
        WHERE fingerprint = $1
        FOR UPDATE
        "#,
        report.fingerprint,
    )
    .fetch_optional(&mut *tx)
    .await?;

    let now = Utc::now();

    let outcome = match existing {
        None => {
            let device = sqlx::query_as!(
                Device,
                r#"
                INSERT INTO devices (
                    fingerprint, pinned_certificate_0, pinned_certificate_1,
                    pinned_certificate_2, pinned_certificate_3,
                    pinned_verified_boot_key, verified_boot_hash,
                    pinned_os_version, pinned_os_patch_level,
                    pinned_vendor_patch_level, pinned_boot_patch_level,
                    pinned_app_version, pinned_security_level,
                    user_profile_secure, enrolled_biometrics, accessibility,
                    adb_enabled, add_users_when_locked, deny_new_usb,
                    oem_unlock_allowed, system_user, device_admin,
                    user_id, verified_time_first, verified_time_last
                )
                VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22,
                    $23, $24, $24
                )
                RETURNING
                    fingerprint, pinned_certificate_0, pinned_certificate_1,
                    pinned_certificate_2, pinned_certificate_3,
                    pinned_verified_boot_key, verified_boot_hash,
                    pinned_os_version, pinned_os_patch_level,
                    pinned_vendor_patch_level, pinned_boot_patch_level,
                    pinned_app_version,
                    pinned_security_level as "pinned_security_level: SecurityLevel",
                    user_profile_secure, enrolled_biometrics, accessibility,
                    adb_enabled, add_users_when_locked, deny_new_usb,
                    oem_unlock_allowed, system_user, device_admin,
                    user_id, verified_time_first, verified_time_last,
                    expired_time_last, failure_time_last, deletion_time
                "#,
                report.fingerprint,
                report.pinned_certificate_0,
                report.pinned_certificate_1,
                report.pinned_certificate_2,
                report.pinned_certificate_3,
                report.pinned_verified_boot_key,
                report.verified_boot_hash,
                report.pinned_os_version,
                report.pinned_os_patch_level,
                report.pinned_vendor_patch_level,
                report.pinned_boot_patch_level,
                report.pinned_app_version,
                report.pinned_security_level.as_str(),
                report.user_profile_secure,
                report.enrolled_biometrics,
                report.accessibility,
                report.adb_enabled,
                report.add_users_when_locked,
                report.deny_new_usb,
                report.oem_unlock_allowed,
                report.system_user,
                report.device_admin,
                user_id,
                now,
            )
            .fetch_one(&mut *tx)
            .await?;
            Outcome::Enrolled(device)
        }
        Some(device) => {
            check_owner(&device, user_id)?;
            check_not_deleted(&device)?;
            check_immutable_fields(&device, report)?;
            check_monotonic_counters(&device, report)?;

            let updated = sqlx::query_as!(
                Device,
                r#"
                UPDATE devices SET
                    verified_time_last = $2,
                    pinned_os_version = $3,
                    pinned_os_patch_level = $4,
                    pinned_vendor_patch_level = $5,
                    pinned_boot_patch_level = $6,
                    pinned_app_version = $7,
                    verified_boot_hash = $8,
                    user_profile_secure = $9,
                    enrolled_biometrics = $10,
                    accessibility = $11,
                    adb_enabled = $12,
                    add_users_when_locked = $13,
                    deny_new_usb = $14,
                    oem_unlock_allowed = $15,
                    system_user = $16,
                    device_admin = $17,
                    expired_time_last = NULL,
                    failure_time_last = NULL
                WHERE fingerprint = $1
                RETURNING
                    fingerprint, pinned_certificate_0, pinned_certificate_1,
                    pinned_certificate_2, pinned_certificate_3,
                    pinned_verified_boot_key, verified_boot_hash,
                    pinned_os_version, pinned_os_patch_level,
                    pinned_vendor_patch_level, pinned_boot_patch_level,
                    pinned_app_version,
                    pinned_security_level as "pinned_security_level: SecurityLevel",
                    user_profile_secure, enrolled_biometrics, accessibility,
                    adb_enabled, add_users_when_locked, deny_new_usb,
                    oem_unlock_allowed, system_user, device_admin,
                    user_id, verified_time_first, verified_time_last,
                    expired_time_last, failure_time_last, deletion_time
                "#,
                report.fingerprint,
                now,
                report.pinned_os_version,
                report.pinned_os_patch_level,
                report.pinned_vendor_patch_level,
                report.pinned_boot_patch_level,
                report.pinned_app_version,
                report.verified_boot_hash,
                report.user_profile_secure,
                report.enrolled_biometrics,
                report.accessibility,
                report.adb_enabled,
                report.add_users_when_locked,
                report.deny_new_usb,
                report.oem_unlock_allowed,
                report.system_user,
                report.device_admin,
            )
            .fetch_one(&mut *tx)
            .await?;
            Outcome::Verified(updated)
        }
    };

    sqlx::query!(
        r#"
        INSERT INTO attestation_history (fingerprint, time, strong, tee_enforced, os_enforced)
        VALUES ($1, $2, $3, $4, $5)
        "#,
        report.fingerprint,
        now,
        strong,
        report.tee_enforced_text,
        report.os_enforced_text,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(outcome)
}

fn check_owner(device: &Device, user_id: i64) -> Result<(), ApiError> {
    if device.user_id != user_id {
        return Err(ApiError::MismatchOwner);
    }
    Ok(())
}

fn check_not_deleted(device: &Device) -> Result<(), ApiError> {
    if device.is_deleted() {
        return Err(ApiError::Revoked);
    }
    Ok(())
}

/// Fingerprint, certificate chain, verified-boot key, and security level
/// never change once pinned (§3 Device, "Immutable once pinned").
fn check_immutable_fields(device: &Device, report: &AttestationReport) -> Result<(), ApiError> {
    let matches = device.pinned_certificate_0 == report.pinned_certificate_0
        && device.pinned_certificate_1 == report.pinned_certificate_1
        && device.pinned_certificate_2 == report.pinned_certificate_2
        && device.pinned_certificate_3 == report.pinned_certificate_3
        && device.pinned_verified_boot_key == report.pinned_verified_boot_key
        && device.pinned_security_level == report.pinned_security_level;
    if !matches {
        return Err(ApiError::MismatchPinning);
    }
    Ok(())
}

/// OS version, patch levels, and app version are monotonic-only; a report
/// carrying a lower value than the pinned record is a rollback attempt
/// (§3 Device, "Monotonic-only"; §8 property 3).
fn check_monotonic_counters(device: &Device, report: &AttestationReport) -> Result<(), ApiError> {
    if report.pinned_os_version < device.pinned_os_version
        || report.pinned_os_patch_level < device.pinned_os_patch_level
        || report.pinned_app_version < device.pinned_app_version
    {
        return Err(ApiError::MismatchDowngrade);
    }
    if let (Some(new), Some(old)) = (report.pinned_vendor_patch_level, device.pinned_vendor_patch_level) {
        if new < old {
            return Err(ApiError::MismatchDowngrade);
        }
    }
    if let (Some(new), Some(old)) = (report.pinned_boot_patch_level, device.pinned_boot_patch_level) {
        if new < old {
            return Err(ApiError::MismatchDowngrade);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_device(user_id: i64) -> Device {
        Device {
            fingerprint: vec![1; 32],
            pinned_certificate_0: vec![0xAA],
            pinned_certificate_1: vec![0xBB],
            pinned_certificate_2: vec![0xCC],
            pinned_certificate_3: vec![0xDD],
            pinned_verified_boot_key: vec![0x01; 32],
            verified_boot_hash: None,
            pinned_os_version: 14,
            pinned_os_patch_level: 20240101,
            pinned_vendor_patch_level: Some(20240101),
            pinned_boot_patch_level: Some(20240101),
            pinned_app_version: 5,
            pinned_security_level: SecurityLevel::Tee,
            user_profile_secure: true,
            enrolled_biometrics: false,
            accessibility: false,
            adb_enabled: false,
            add_users_when_locked: false,
            deny_new_usb: false,
            oem_unlock_allowed: false,
            system_user: true,
            device_admin: 0,
            user_id,
            verified_time_first: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            verified_time_last: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            expired_time_last: None,
            failure_time_last: None,
            deletion_time: None,
        }
    }

    fn matching_report(device: &Device) -> AttestationReport {
        use crate::services::catalogue::DeviceIdentity;
        AttestationReport {
            fingerprint: device.fingerprint.clone(),
            pinned_certificate_0: device.pinned_certificate_0.clone(),
            pinned_certificate_1: device.pinned_certificate_1.clone(),
            pinned_certificate_2: device.pinned_certificate_2.clone(),
            pinned_certificate_3: device.pinned_certificate_3.clone(),
            pinned_verified_boot_key: device.pinned_verified_boot_key.clone(),
            verified_boot_hash: None,
            pinned_os_version: device.pinned_os_version,
            pinned_os_patch_level: device.pinned_os_patch_level,
            pinned_vendor_patch_level: device.pinned_vendor_patch_level,
            pinned_boot_patch_level: device.pinned_boot_patch_level,
            pinned_app_version: device.pinned_app_version,
            pinned_security_level: device.pinned_security_level,
            device_identity: DeviceIdentity {
                os_family: "test",
                model: "test",
                strongbox: false,
                custom_os: false,
            },
            challenge: vec![0; 32],
            tee_enforced_text: String::new(),
            os_enforced_text: String::new(),
            user_profile_secure: device.user_profile_secure,
            enrolled_biometrics: device.enrolled_biometrics,
            accessibility: device.accessibility,
            adb_enabled: device.adb_enabled,
            add_users_when_locked: device.add_users_when_locked,
            deny_new_usb: device.deny_new_usb,
            oem_unlock_allowed: device.oem_unlock_allowed,
            system_user: device.system_user,
            device_admin: device.device_admin,
        }
    }

    #[test]
    fn owner_mismatch_is_rejected() {
        let device = sample_device(1);
        assert!(matches!(
            check_owner(&device, 2),
            Err(ApiError::MismatchOwner)
        ));
    }

    #[test]
    fn deleted_device_is_rejected() {
        let mut device = sample_device(1);
        device.deletion_time = Some(Utc::now());
        assert!(matches!(check_not_deleted(&device), Err(ApiError::Revoked)));
    }

    #[test]
    fn matching_report_passes_every_check() {
        let device = sample_device(1);
        let report = matching_report(&device);
        assert!(check_owner(&device, 1).is_ok());
        assert!(check_not_deleted(&device).is_ok());
        assert!(check_immutable_fields(&device, &report).is_ok());
        assert!(check_monotonic_counters(&device, &report).is_ok());
    }

    #[test]
    fn certificate_change_is_rejected_as_pinning_mismatch() {
        let device = sample_device(1);
        let mut report = matching_report(&device);
        report.pinned_certificate_0 = vec![0xFF];
        assert!(matches!(
            check_immutable_fields(&device, &report),
            Err(ApiError::MismatchPinning)
        ));
    }

    #[test]
    fn verified_boot_key_change_is_rejected_as_pinning_mismatch() {
        let device = sample_device(1);
        let mut report = matching_report(&device);
        report.pinned_verified_boot_key = vec![0x02; 32];
        assert!(matches!(
            check_immutable_fields(&device, &report),
            Err(ApiError::MismatchPinning)
        ));
    }

    #[test]
    fn os_version_downgrade_is_rejected() {
        let device = sample_device(1);
        let mut report = matching_report(&device);
        report.pinned_os_version -= 1;
        assert!(matches!(
            check_monotonic_counters(&device, &report),
            Err(ApiError::MismatchDowngrade)
        ));
    }

    #[test]
    fn app_version_increase_is_accepted() {
        let device = sample_device(1);
        let mut report = matching_report(&device);
        report.pinned_app_version += 1;
        assert!(check_monotonic_counters(&device, &report).is_ok());
    }

    #[test]
    fn vendor_patch_level_downgrade_is_rejected() {
        let device = sample_device(1);
        let mut report = matching_report(&device);
        report.pinned_vendor_patch_level = Some(device.pinned_vendor_patch_level.unwrap() - 1);
        assert!(matches!(
            check_monotonic_counters(&device, &report),
            Err(ApiError::MismatchDowngrade)
        ));
    }
}
