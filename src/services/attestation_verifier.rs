//! Attestation Verifier (component C) — §4.2 "Attestation Verifier"
//!
//! Parses and validates the hardware-keystore attestation chain, extracts
//! the keystore attestation extension (OID 1.3.6.1.4.1.11129.2.1.17), checks
//! challenge freshness against the Challenge Index, and produces a
//! normalized `AttestationReport`. Holds no state across requests.

use chrono::{DateTime, TimeZone, Utc};
use der_parser::ber::{BerObject, BerObjectContent};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use thiserror::Error;
use x509_parser::oid_registry::Oid;
use x509_parser::prelude::*;

use crate::models::SecurityLevel;
use crate::services::catalogue::{self, DeviceIdentity};
use crate::services::challenge_store::ChallengeStore;

/// OID of the Android/hardware-keystore attestation extension.
const KEY_ATTESTATION_OID_STR: &str = "1.3.6.1.4.1.11129.2.1.17";

/// Expected framing byte for the auditor protocol (§4.2 step 1).
const PROTOCOL_VERSION: u8 = 1;

/// Keymaster authorization-list tags consulted below (subset relevant to
/// the fields this crate persists; see §3 Device / §4.2 step 4).
mod tags {
    pub const OS_VERSION: u64 = 705;
    pub const OS_PATCH_LEVEL: u64 = 706;
    pub const VENDOR_PATCH_LEVEL: u64 = 718;
    pub const BOOT_PATCH_LEVEL: u64 = 719;
    pub const ROOT_OF_TRUST: u64 = 704;
    pub const APPLICATION_ID: u64 = 709;
}

/// Bit positions of the eleven-flags-minus-deviceAdmin device state bitmask
/// appended to the auditor-protocol framing (§3 Device, "eleven boolean
/// state flags captured by the auditor"). These describe settings the
/// attestation extension itself does not carry (screen lock, biometrics
/// enrollment, ADB, USB policy, ...); the auditor app samples them from the
/// device's own `DevicePolicyManager`/`Settings` APIs and reports them
/// alongside the certificate chain.
mod device_state_bits {
    pub const USER_PROFILE_SECURE: u8 = 1 << 0;
    pub const ENROLLED_BIOMETRICS: u8 = 1 << 1;
    pub const ACCESSIBILITY: u8 = 1 << 2;
    pub const ADB_ENABLED: u8 = 1 << 3;
    pub const ADD_USERS_WHEN_LOCKED: u8 = 1 << 4;
    pub const DENY_NEW_USB: u8 = 1 << 5;
    pub const OEM_UNLOCK_ALLOWED: u8 = 1 << 6;
    pub const SYSTEM_USER: u8 = 1 << 7;
}

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("bad framing")]
    BadFraming,
    #[error("chain too short")]
    ChainTooShort,
    #[error("certificate parse failed: {0}")]
    CertParse(String),
    #[error("certificate expired or not yet valid")]
    CertExpired,
    #[error("chain does not terminate at a trusted vendor root")]
    UntrustedRoot,
    #[error("chain signature verification failed")]
    ChainSignature,
    #[error("attestation extension missing or malformed: {0}")]
    ExtensionMalformed(String),
    #[error("stale challenge")]
    StaleChallenge,
    #[error("unknown device")]
    UnknownDevice,
}

/// Device state flags carried alongside the attestation chain, outside the
/// keystore extension (§3 Device, "eleven boolean state flags ... plus
/// deviceAdmin").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub user_profile_secure: bool,
    pub enrolled_biometrics: bool,
    pub accessibility: bool,
    pub adb_enabled: bool,
    pub add_users_when_locked: bool,
    pub deny_new_usb: bool,
    pub oem_unlock_allowed: bool,
    pub system_user: bool,
    /// 0 = none, 1 = profile owner, 2 = device owner.
    pub device_admin: i32,
}

fn parse_device_state(flags: u8, device_admin: u8) -> Result<DeviceState, VerifierError> {
    if device_admin > 2 {
        return Err(VerifierError::BadFraming);
    }
    Ok(DeviceState {
        user_profile_secure: flags & device_state_bits::USER_PROFILE_SECURE != 0,
        enrolled_biometrics: flags & device_state_bits::ENROLLED_BIOMETRICS != 0,
        accessibility: flags & device_state_bits::ACCESSIBILITY != 0,
        adb_enabled: flags & device_state_bits::ADB_ENABLED != 0,
        add_users_when_locked: flags & device_state_bits::ADD_USERS_WHEN_LOCKED != 0,
        deny_new_usb: flags & device_state_bits::DENY_NEW_USB != 0,
        oem_unlock_allowed: flags & device_state_bits::OEM_UNLOCK_ALLOWED != 0,
        system_user: flags & device_state_bits::SYSTEM_USER != 0,
        device_admin: device_admin as i32,
    })
}

/// Root of trust fields from the attestation extension (§3, §GLOSSARY).
#[derive(Debug, Clone)]
pub struct RootOfTrust {
    pub verified_boot_key: Vec<u8>,
    pub device_locked: bool,
    pub verified_boot_hash: Option<Vec<u8>>,
}

/// Authorization list: the subset of TEE/software-enforced tags this crate
/// persists or uses for pinning decisions.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationList {
    pub os_version: Option<i64>,
    pub os_patch_level: Option<i64>,
    pub vendor_patch_level: Option<i64>,
    pub boot_patch_level: Option<i64>,
    pub application_id: Option<Vec<u8>>,
    pub root_of_trust: Option<RootOfTrust>,
}

impl AuthorizationList {
    /// Line-oriented `key: value` rendering used for the persisted text
    /// blobs (§9 open-question resolution: stable text, not JSON).
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        if let Some(v) = self.os_version {
            lines.push(format!("osVersion: {v}"));
        }
        if let Some(v) = self.os_patch_level {
            lines.push(format!("osPatchLevel: {v}"));
        }
        if let Some(v) = self.vendor_patch_level {
            lines.push(format!("vendorPatchLevel: {v}"));
        }
        if let Some(v) = self.boot_patch_level {
            lines.push(format!("bootPatchLevel: {v}"));
        }
        if let Some(app) = &self.application_id {
            lines.push(format!("applicationId: {}", hex::encode(app)));
        }
        if let Some(rot) = &self.root_of_trust {
            lines.push(format!(
                "verifiedBootKey: {}",
                hex::encode(&rot.verified_boot_key)
            ));
            lines.push(format!("deviceLocked: {}", rot.device_locked));
            if let Some(hash) = &rot.verified_boot_hash {
                lines.push(format!("verifiedBootHash: {}", hex::encode(hash)));
            }
        }
        lines.join("\n")
    }
}

/// Parsed `KeyDescription` attestation extension (§4.2 step 4).
#[derive(Debug, Clone)]
pub struct KeyDescription {
    pub attestation_version: i64,
    pub attestation_security_level: SecurityLevel,
    pub attestation_challenge: Vec<u8>,
    pub software_enforced: AuthorizationList,
    pub tee_enforced: AuthorizationList,
}

/// Normalized report handed off to the Pinning Store (§4.2 Output, §3 Device
/// minus the owner/history bookkeeping fields D itself is responsible for).
#[derive(Debug, Clone)]
pub struct AttestationReport {
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
    pub device_identity: DeviceIdentity,
    pub challenge: Vec<u8>,
    pub tee_enforced_text: String,
    pub os_enforced_text: String,
    pub user_profile_secure: bool,
    pub enrolled_biometrics: bool,
    pub accessibility: bool,
    pub adb_enabled: bool,
    pub add_users_when_locked: bool,
    pub deny_new_usb: bool,
    pub oem_unlock_allowed: bool,
    pub system_user: bool,
    pub device_admin: i32,
}

/// Parses the auditor-protocol framing and returns the device state plus the
/// raw chain bytes.
///
/// Framing: `version(1B) || deviceStateFlags(1B bitmask) || deviceAdmin(1B)
/// || DER cert chain`. This crate treats the declared length conservatively
/// as "remaining bytes must not exceed `max_len`" (§4.2 step 1).
fn check_framing(bundle: &[u8], max_len: usize) -> Result<(DeviceState, &[u8]), VerifierError> {
    if bundle.len() > max_len {
        return Err(VerifierError::BadFraming);
    }
    let [version, flags_byte, device_admin_byte, rest @ ..] = bundle else {
        return Err(VerifierError::BadFraming);
    };
    if *version != PROTOCOL_VERSION {
        return Err(VerifierError::BadFraming);
    }
    let device_state = parse_device_state(*flags_byte, *device_admin_byte)?;
    Ok((device_state, rest))
}

/// Parses a concatenated sequence of DER certificates, leaf first.
fn parse_chain(der_concat: &[u8]) -> Result<Vec<X509Certificate<'_>>, VerifierError> {
    let mut certs = Vec::new();
    let mut rest = der_concat;
    while !rest.is_empty() {
        let (remaining, cert) =
            X509Certificate::from_der(rest).map_err(|e| VerifierError::CertParse(e.to_string()))?;
        certs.push(cert);
        rest = remaining;
    }
    if certs.len() < 2 {
        return Err(VerifierError::ChainTooShort);
    }
    Ok(certs)
}

/// Verifies validity periods and issuer/subject chaining (§4.2 step 3).
/// Signature verification against the embedded vendor root is performed
/// when `strict` is set; in permissive mode (local dev fixtures only) the
/// structural chaining check still runs.
fn verify_chain(
    certs: &[X509Certificate<'_>],
    vendor_roots: &[&[u8]],
    strict: bool,
) -> Result<(), VerifierError> {
    let now = Utc::now();
    for cert in certs {
        let validity = cert.validity();
        let not_before = validity.not_before.timestamp();
        let not_after = validity.not_after.timestamp();
        if now.timestamp() < not_before || now.timestamp() > not_after {
            return Err(VerifierError::CertExpired);
        }
    }

    for pair in certs.windows(2) {
        let (leaf, issuer) = (&pair[0], &pair[1]);
        if leaf.issuer() != issuer.subject() {
            return Err(VerifierError::ChainSignature);
        }
        if strict {
            let issuer_key = issuer.public_key();
            leaf.verify_signature(Some(issuer_key))
                .map_err(|_| VerifierError::ChainSignature)?;
        }
    }

    let root = certs.last().ok_or(VerifierError::ChainTooShort)?;
    let root_spki = root.public_key().raw;
    if !vendor_roots.iter().any(|r| *r == root_spki) {
        if strict {
            return Err(VerifierError::UntrustedRoot);
        }
        tracing::warn!("chain root not in embedded vendor set (permissive mode)");
    }

    Ok(())
}

/// Locates and parses the keystore attestation extension in the leaf cert.
fn parse_key_description(leaf: &X509Certificate<'_>) -> Result<KeyDescription, VerifierError> {
    let oid = Oid::from_str(KEY_ATTESTATION_OID_STR)
        .map_err(|_| VerifierError::ExtensionMalformed("bad oid".into()))?;
    let ext = leaf
        .extensions()
        .iter()
        .find(|e| e.oid == oid)
        .ok_or_else(|| VerifierError::ExtensionMalformed("extension absent".into()))?;

    let (_, seq) = der_parser::parse_der(ext.value)
        .map_err(|e| VerifierError::ExtensionMalformed(e.to_string()))?;

    let items = match &seq.content {
        BerObjectContent::Sequence(items) => items,
        _ => return Err(VerifierError::ExtensionMalformed("not a sequence".into())),
    };

    // KeyDescription ::= SEQUENCE {
    //   attestationVersion, attestationSecurityLevel, keymasterVersion,
    //   keymasterSecurityLevel, attestationChallenge, uniqueId,
    //   softwareEnforced AuthorizationList, teeEnforced AuthorizationList }
    if items.len() < 8 {
        return Err(VerifierError::ExtensionMalformed("short KeyDescription".into()));
    }

    let attestation_version = parse_integer(&items[0])?;
    let attestation_security_level = parse_security_level(&items[1])?;
    let attestation_challenge = parse_octet_string(&items[4])?;
    let software_enforced = parse_authorization_list(&items[6])?;
    let tee_enforced = parse_authorization_list(&items[7])?;

    Ok(KeyDescription {
        attestation_version,
        attestation_security_level,
        attestation_challenge,
        software_enforced,
        tee_enforced,
    })
}

fn parse_integer(obj: &BerObject<'_>) -> Result<i64, VerifierError> {
    obj.as_i64()
        .map_err(|e| VerifierError::ExtensionMalformed(format!("integer: {e}")))
}

fn parse_octet_string(obj: &BerObject<'_>) -> Result<Vec<u8>, VerifierError> {
    match &obj.content {
        BerObjectContent::OctetString(bytes) => Ok(bytes.to_vec()),
        _ => Err(VerifierError::ExtensionMalformed("expected octet string".into())),
    }
}

fn parse_security_level(obj: &BerObject<'_>) -> Result<SecurityLevel, VerifierError> {
    let v = parse_integer(obj)?;
    match v {
        0 => Ok(SecurityLevel::Tee), // Software; treated as TEE subtable miss downstream
        1 => Ok(SecurityLevel::Tee),
        2 => Ok(SecurityLevel::StrongBox),
        _ => Err(VerifierError::ExtensionMalformed(format!(
            "unknown security level {v}"
        ))),
    }
}

/// Walks an `AuthorizationList` SET, picking out the tags this crate cares
/// about. Each element is `[tag] EXPLICIT <type>` context-tagged.
fn parse_authorization_list(obj: &BerObject<'_>) -> Result<AuthorizationList, VerifierError> {
    let items = match &obj.content {
        BerObjectContent::Set(items) | BerObjectContent::Sequence(items) => items,
        _ => return Err(VerifierError::ExtensionMalformed("expected SET".into())),
    };

    let mut list = AuthorizationList::default();
    for item in items {
        let Some(tag_number) = item.tag().0.checked_sub(0xa0) else {
            continue;
        };
        let tag_number = u64::from(tag_number);
        let inner = unwrap_explicit(item);

        match tag_number {
            tags::OS_VERSION => list.os_version = parse_integer(&inner).ok(),
            tags::OS_PATCH_LEVEL => list.os_patch_level = parse_integer(&inner).ok(),
            tags::VENDOR_PATCH_LEVEL => list.vendor_patch_level = parse_integer(&inner).ok(),
            tags::BOOT_PATCH_LEVEL => list.boot_patch_level = parse_integer(&inner).ok(),
            tags::APPLICATION_ID => list.application_id = parse_octet_string(&inner).ok(),
            tags::ROOT_OF_TRUST => list.root_of_trust = parse_root_of_trust(&inner).ok(),
            _ => {}
        }
    }
    Ok(list)
}

/// Context-tagged elements wrap their real value one level down; this
/// mirrors the nonce-extension unwrapping already used elsewhere in this
/// codebase for a single-field case, generalized to arbitrary inner types.
fn unwrap_explicit<'a>(tagged: &'a BerObject<'a>) -> BerObject<'a> {
    match &tagged.content {
        BerObjectContent::Unknown(any) => der_parser::parse_der(any.data)
            .map(|(_, inner)| inner)
            .unwrap_or_else(|_| tagged.clone()),
        _ => tagged.clone(),
    }
}

fn parse_root_of_trust(obj: &BerObject<'_>) -> Result<RootOfTrust, VerifierError> {
    let items = match &obj.content {
        BerObjectContent::Sequence(items) => items,
        _ => return Err(VerifierError::ExtensionMalformed("expected RootOfTrust SEQUENCE".into())),
    };
    if items.len() < 2 {
        return Err(VerifierError::ExtensionMalformed("short RootOfTrust".into()));
    }
    let verified_boot_key = parse_octet_string(&items[0])?;
    let device_locked = items[1].as_bool().unwrap_or(false);
    let verified_boot_hash = items.get(4).and_then(|o| parse_octet_string(o).ok());

    Ok(RootOfTrust {
        verified_boot_key,
        device_locked,
        verified_boot_hash,
    })
}

/// Step 6: fingerprint is derived from the *second-to-root* certificate's
/// public key (the device's batched attestation key, stable across
/// factory-reset-free reboots).
fn derive_fingerprint(certs: &[X509Certificate<'_>]) -> Vec<u8> {
    let batch_cert = &certs[certs.len() - 2];
    Sha256::digest(batch_cert.public_key().raw).to_vec()
}

/// Runs the full §4.2 pipeline.
pub async fn verify(
    bundle: &[u8],
    max_message_size: usize,
    vendor_roots: &[&[u8]],
    strict: bool,
    challenges: &ChallengeStore,
) -> Result<AttestationReport, VerifierError> {
    // 1. Framing check.
    let (device_state, chain_der) = check_framing(bundle, max_message_size)?;

    // 2. Chain parse.
    let certs = parse_chain(chain_der)?;
    let leaf = &certs[0];

    // 3. Signature chain verification.
    verify_chain(&certs, vendor_roots, strict)?;

    // 4. Attestation extension extraction.
    let key_description = parse_key_description(leaf)?;

    // 5. Challenge binding.
    let nonce: [u8; 32] = key_description
        .attestation_challenge
        .clone()
        .try_into()
        .map_err(|_| VerifierError::ExtensionMalformed("challenge not 32 bytes".into()))?;
    if !challenges.consume(&nonce).await {
        return Err(VerifierError::StaleChallenge);
    }

    // 6. Fingerprint derivation.
    let fingerprint = derive_fingerprint(&certs);

    // 7. Catalogue lookup.
    let rot = key_description
        .tee_enforced
        .root_of_trust
        .clone()
        .or_else(|| key_description.software_enforced.root_of_trust.clone())
        .ok_or_else(|| VerifierError::ExtensionMalformed("no root of trust".into()))?;
    let verified_boot_key_hex = hex::encode(&rot.verified_boot_key);
    let device_identity = catalogue::lookup(&verified_boot_key_hex, key_description.attestation_security_level)
        .ok_or(VerifierError::UnknownDevice)?;

    // 8. Report assembly.
    let combined = merge_auth_lists(&key_description.tee_enforced, &key_description.software_enforced);
    let cert_der: Vec<Vec<u8>> = (0..4)
        .map(|i| certs.get(i).map(|c| c.as_ref().to_vec()).unwrap_or_default())
        .collect();

    Ok(AttestationReport {
        fingerprint,
        pinned_certificate_0: cert_der[0].clone(),
        pinned_certificate_1: cert_der[1].clone(),
        pinned_certificate_2: cert_der[2].clone(),
        pinned_certificate_3: cert_der[3].clone(),
        pinned_verified_boot_key: rot.verified_boot_key,
        verified_boot_hash: rot.verified_boot_hash,
        pinned_os_version: combined.os_version.unwrap_or(0),
        pinned_os_patch_level: combined.os_patch_level.unwrap_or(0),
        pinned_vendor_patch_level: combined.vendor_patch_level,
        pinned_boot_patch_level: combined.boot_patch_level,
        pinned_app_version: 0,
        pinned_security_level: key_description.attestation_security_level,
        device_identity,
        challenge: nonce.to_vec(),
        tee_enforced_text: key_description.tee_enforced.to_text(),
        os_enforced_text: key_description.software_enforced.to_text(),
        user_profile_secure: device_state.user_profile_secure,
        enrolled_biometrics: device_state.enrolled_biometrics,
        accessibility: device_state.accessibility,
        adb_enabled: device_state.adb_enabled,
        add_users_when_locked: device_state.add_users_when_locked,
        deny_new_usb: device_state.deny_new_usb,
        oem_unlock_allowed: device_state.oem_unlock_allowed,
        system_user: device_state.system_user,
        device_admin: device_state.device_admin,
    })
}

fn merge_auth_lists(tee: &AuthorizationList, sw: &AuthorizationList) -> AuthorizationList {
    AuthorizationList {
        os_version: tee.os_version.or(sw.os_version),
        os_patch_level: tee.os_patch_level.or(sw.os_patch_level),
        vendor_patch_level: tee.vendor_patch_level.or(sw.vendor_patch_level),
        boot_patch_level: tee.boot_patch_level.or(sw.boot_patch_level),
        application_id: tee.application_id.clone().or_else(|| sw.application_id.clone()),
        root_of_trust: tee.root_of_trust.clone().or_else(|| sw.root_of_trust.clone()),
    }
}

/// Converts a raw X.509 `not_before`/`not_after` time into a `DateTime<Utc>`,
/// used by tests that build synthetic certificates.
#[cfg(test)]
pub fn utc_from_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}
