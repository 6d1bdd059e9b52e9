//! Device (Pinning Record) entity model — §3 "Device (Pinning Record)"
//!
//! Primary key is the 32-byte fingerprint the verifier derives from the
//! device's persistent attestation key. Once a row is pinned, the fields
//! marked immutable below never change again (enforced in
//! `services::pinning_store`, not here).

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Hardware security level a key is backed by (§3, §GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize)]
#[sqlx(type_name = "text")]
pub enum SecurityLevel {
    Tee,
    StrongBox,
}

impl SecurityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityLevel::Tee => "tee",
            SecurityLevel::StrongBox => "strongbox",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "tee" => Some(SecurityLevel::Tee),
            "strongbox" => Some(SecurityLevel::StrongBox),
            _ => None,
        }
    }
}

/// A pinned device identity record (§3 Device).
///
/// Immutable once pinned: `pinned_verified_boot_key`, `pinned_certificate_0..3`,
/// `pinned_security_level`, `user_id`, `verified_time_first`.
/// Monotonic-only: `pinned_os_version`, `pinned_os_patch_level`,
/// `pinned_vendor_patch_level`, `pinned_boot_patch_level`, `pinned_app_version`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Device {
    pub fingerprint: Vec<u8>,

    pub pinned_certificate_0: Vec<u8>,
    pub pinned_certificate_1: Vec<u8>,
    pub pinned_certificate_2: Vec<u8>,
    pub pinned_certificate_3: Vec<u8>,

    pub pinned_verified_boot_key: Vec<u8>,
    pub verified_boot_hash: Option<Vec<u8>>,

    pub pinned_os_version: i64,
    pub pinned_os_patch_level: i64,
    pub pinned_vendor_patch_level: Option<i64>,
    pub pinned_boot_patch_level: Option<i64>,
    pub pinned_app_version: i64,

    pub pinned_security_level: SecurityLevel,

    pub user_profile_secure: bool,
    pub enrolled_biometrics: bool,
    pub accessibility: bool,
    pub adb_enabled: bool,
    pub add_users_when_locked: bool,
    pub deny_new_usb: bool,
    pub oem_unlock_allowed: bool,
    pub system_user: bool,
    /// 0 = none, 1 = profile owner, 2 = device owner (§3).
    pub device_admin: i32,

    pub user_id: i64,

    pub verified_time_first: DateTime<Utc>,
    pub verified_time_last: DateTime<Utc>,
    pub expired_time_last: Option<DateTime<Utc>>,
    pub failure_time_last: Option<DateTime<Utc>>,
    pub deletion_time: Option<DateTime<Utc>>,
}

impl Device {
    pub fn is_deleted(&self) -> bool {
        self.deletion_time.is_some()
    }
}
