//! Common test utilities and fixtures for integration tests
//!
//! Provides:
//! - TestApp: spawns the router against Postgres testcontainers
//! - Factories: generate signup/attestation test data
//! - Assertions: checks over the JSON response envelope

pub mod test_app;
pub mod factories;
pub mod assertions;

pub use assertions::*;
pub use factories::*;
pub use test_app::TestApp;
