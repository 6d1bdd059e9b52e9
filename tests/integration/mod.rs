//! Integration tests for the attestation server
//!
//! These run against real PostgreSQL containers (one per database of the
//! dual-database model) via `testcontainers`. Run with
//! `cargo test --test integration`.
//!
//! Test organization:
//! - `accounts_test.rs` - signup/login/logout/session lifecycle
//! - `attestation_test.rs` - `/challenge`, `/verify`, `/submit` surface
//! - `devices_test.rs` - device listing, history, deletion via `/api`

mod common;
mod accounts_test;
mod attestation_test;
mod devices_test;
