//! Route modules and router assembly
//!
//! - `/health`, `/ready` — root-level health endpoints.
//! - `/challenge`, `/verify`, `/submit` — opaque-bytes attestation surface.
//! - `/api/*` — session-authenticated, JSON-enveloped account/device surface.

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;

use crate::config::Config;
use crate::services::ChallengeStore;

pub mod account;
pub mod attestation;
pub mod health;

/// Shared state handed to every handler (§6 "Ambient interface notes").
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub samples_db: PgPool,
    pub challenge_store: Arc<ChallengeStore>,
    pub config: Arc<Config>,
}

/// Creates the main API router with all routes.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .merge(attestation::router())
        .nest("/api", account::router(&state))
        .with_state(state)
}
