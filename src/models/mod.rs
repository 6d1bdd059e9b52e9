//! Database entity models
//!
//! Rust structs mapping to PostgreSQL tables, deriving `sqlx::FromRow` for
//! compile-time checked queries (this codebase's existing convention).

mod account;
mod attestation;
mod device;
mod session;

pub use account::{is_valid_username, Account};
pub use attestation::AttestationRow;
pub use device::{Device, SecurityLevel};
pub use session::Session;
