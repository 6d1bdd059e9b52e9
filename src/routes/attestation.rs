//! Attestation ingress adapters (component G) — §6 "Attestation surface"
//!
//! `/challenge`, `/verify`, and `/submit`. These endpoints speak opaque
//! bytes, never JSON: clients are embedded mobile devices, not browsers,
//! and the response surface is a bare status code plus a short plain-text
//! message (`PlainApiError`).

use axum::{
    body::Bytes,
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;

use crate::error::{ApiError, PlainApiError};
use crate::routes::AppState;
use crate::services::{attestation_verifier, pinning_store, vendor_roots};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/challenge", post(issue_challenge))
        .route("/verify", post(verify))
        .route("/submit", post(submit_sample))
}

/// POST /challenge — issues a fresh one-shot nonce (§4.1 Challenge Index).
async fn issue_challenge(State(state): State<AppState>) -> Response {
    let nonce = state.challenge_store.issue().await;
    hex::encode(nonce).into_response()
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    /// Numeric account id the report should be pinned under.
    user_id: i64,
    /// Optional subscribe key; when it matches the account's current key,
    /// the resulting attestation row is marked `strong` (§GLOSSARY).
    subscribe_key: Option<String>,
}

/// POST /verify — verifies an attestation bundle and pins/continuity-checks
/// the device (§4.2 Attestation Verifier, §4.3 Pinning Store).
async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
    body: Bytes,
) -> Response {
    if body.len() > state.config.max_message_size {
        return PlainApiError::verify(ApiError::TooLarge).into_response();
    }

    let strong = match &query.subscribe_key {
        Some(key) => match hex::decode(key) {
            Ok(bytes) => account_subscribe_key_matches(&state, query.user_id, &bytes).await,
            Err(_) => false,
        },
        None => false,
    };

    let trusted_roots = vendor_roots::trusted_root_spkis();
    let report = match attestation_verifier::verify(
        &body,
        state.config.max_message_size,
        &trusted_roots,
        state.config.strict_attestation,
        state.challenge_store.as_ref(),
    )
    .await
    {
        Ok(report) => report,
        Err(error) => return PlainApiError::verify(map_verifier_error(error)).into_response(),
    };

    match pinning_store::record(&state.db, &report, query.user_id, strong).await {
        Ok(_outcome) => "ok".into_response(),
        Err(error) => PlainApiError::verify(error).into_response(),
    }
}

async fn account_subscribe_key_matches(state: &AppState, user_id: i64, candidate: &[u8]) -> bool {
    match sqlx::query_scalar!("SELECT subscribe_key FROM accounts WHERE user_id = $1", user_id)
        .fetch_optional(&state.db)
        .await
    {
        Ok(Some(key)) => key == candidate,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    fingerprint: String,
}

/// POST /submit — writes an opaque sample blob to the samples database
/// (§6 "two databases (main + samples)"). The samples store is write-only
/// from this surface; nothing here reads it back.
async fn submit_sample(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    body: Bytes,
) -> Response {
    if body.len() > state.config.max_sample_size {
        return PlainApiError::new(ApiError::TooLarge).into_response();
    }

    let Ok(fingerprint) = hex::decode(&query.fingerprint) else {
        return PlainApiError::new(ApiError::Malformed("fingerprint not hex".into())).into_response();
    };

    let sample = body.to_vec();
    let result = sqlx::query!(
        "INSERT INTO samples (fingerprint, time, payload) VALUES ($1, $2, $3)",
        fingerprint,
        chrono::Utc::now(),
        sample,
    )
    .execute(&state.samples_db)
    .await;

    match result {
        Ok(_) => "ok".into_response(),
        Err(error) => PlainApiError::new(ApiError::Database(error)).into_response(),
    }
}

fn map_verifier_error(error: attestation_verifier::VerifierError) -> ApiError {
    use attestation_verifier::VerifierError as V;
    match error {
        V::BadFraming | V::ChainTooShort | V::CertParse(_) | V::ExtensionMalformed(_) => {
            ApiError::Malformed(error.to_string())
        }
        V::CertExpired | V::UntrustedRoot | V::ChainSignature => ApiError::Unauthenticated,
        V::StaleChallenge => ApiError::StaleChallenge,
        V::UnknownDevice => ApiError::UnknownDevice,
    }
}
