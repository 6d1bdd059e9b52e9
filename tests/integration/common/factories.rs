//! Test data factories
//!
//! Factories generate realistic request payloads and persisted fixtures
//! for the account/device/attestation domain. All support a builder
//! pattern for customization.

use chrono::{DateTime, Utc};
use fake::{faker::internet::en::SafeEmail, faker::internet::en::Username, Fake};
use serde::Serialize;

/// Signup request factory.
#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
}

impl Default for SignupRequest {
    fn default() -> Self {
        let username: String = Username().fake();
        Self {
            username: username.chars().filter(|c| c.is_ascii_alphanumeric()).collect(),
            password: "correct horse battery staple".to_string(),
            email: Some(SafeEmail().fake()),
        }
    }
}

impl SignupRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn without_email(mut self) -> Self {
        self.email = None;
        self
    }
}

/// Raw attestation bundle factory, mirroring the wire framing the
/// verifier expects. Tests that need a bundle which actually parses build
/// one with the helpers in `attestation_verifier`'s own unit tests
/// instead; this factory is for negative-path framing tests only.
pub struct RawBundleFactory;

impl RawBundleFactory {
    pub fn empty() -> Vec<u8> {
        Vec::new()
    }

    pub fn truncated_length_prefix() -> Vec<u8> {
        vec![0x00, 0x00, 0x00]
    }

    pub fn garbage(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }
}

/// Fixture timestamps used by pinning-store tests that need deterministic
/// "first seen" / "last seen" ordering.
pub fn fixed_time(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}
