//! API error handling module
//!
//! Defines the error kinds the core surfaces (§7) and their HTTP mapping.

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use uuid::Uuid;

use crate::types::ApiErrorResponse;

/// Error codes, stable across releases, surfaced in the JSON error envelope.
pub mod codes {
    pub const MALFORMED: &str = "MALFORMED";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const STALE_CHALLENGE: &str = "STALE_CHALLENGE";
    pub const UNKNOWN_DEVICE: &str = "UNKNOWN_DEVICE";
    pub const MISMATCH_OWNER: &str = "MISMATCH_OWNER";
    pub const MISMATCH_PINNING: &str = "MISMATCH_PINNING";
    pub const MISMATCH_DOWNGRADE: &str = "MISMATCH_DOWNGRADE";
    pub const REVOKED: &str = "REVOKED";
    pub const TOO_LARGE: &str = "TOO_LARGE";
    pub const CONFLICT: &str = "CONFLICT";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Error kinds surfaced by the core (§7). Every variant maps to exactly one
/// HTTP status and one external-safe message; internal detail (parse
/// failures, database errors) never crosses into `safe_message`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request body does not decode: {0}")]
    Malformed(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("challenge absent or expired")]
    StaleChallenge,

    #[error("verified-boot key not in catalogue")]
    UnknownDevice,

    #[error("device is pinned to a different account")]
    MismatchOwner,

    #[error("pinned identity fields do not match")]
    MismatchPinning,

    #[error("monotonic counter regressed")]
    MismatchDowngrade,

    #[error("device has been deleted")]
    Revoked,

    #[error("request body exceeded the size cap")]
    TooLarge,

    #[error("unique constraint violated")]
    Conflict,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Malformed(_) => codes::MALFORMED,
            ApiError::Unauthenticated => codes::UNAUTHENTICATED,
            ApiError::StaleChallenge => codes::STALE_CHALLENGE,
            ApiError::UnknownDevice => codes::UNKNOWN_DEVICE,
            ApiError::MismatchOwner => codes::MISMATCH_OWNER,
            ApiError::MismatchPinning => codes::MISMATCH_PINNING,
            ApiError::MismatchDowngrade => codes::MISMATCH_DOWNGRADE,
            ApiError::Revoked => codes::REVOKED,
            ApiError::TooLarge => codes::TOO_LARGE,
            ApiError::Conflict => codes::CONFLICT,
            ApiError::Internal(_) | ApiError::Database(_) => codes::INTERNAL,
        }
    }

    /// HTTP status for the JSON-envelope (`/api/*`) surface.
    ///
    /// `Unauthenticated` is split by surface in §7 (403 on admin endpoints,
    /// 400 on `/verify`); this is the admin-surface mapping. `/verify`'s
    /// ingress adapter maps `Unauthenticated` to 400 directly.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::FORBIDDEN,
            ApiError::StaleChallenge => StatusCode::BAD_REQUEST,
            ApiError::UnknownDevice => StatusCode::BAD_REQUEST,
            ApiError::MismatchOwner => StatusCode::BAD_REQUEST,
            ApiError::MismatchPinning => StatusCode::BAD_REQUEST,
            ApiError::MismatchDowngrade => StatusCode::BAD_REQUEST,
            ApiError::Revoked => StatusCode::BAD_REQUEST,
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe for external consumption; never includes internal detail.
    pub fn safe_message(&self) -> String {
        match self {
            ApiError::Malformed(_) => "request body does not decode".to_string(),
            ApiError::Unauthenticated => "authentication required or invalid".to_string(),
            ApiError::StaleChallenge => "challenge is absent or expired".to_string(),
            ApiError::UnknownDevice => "device identity not recognized".to_string(),
            ApiError::MismatchOwner => "device is owned by a different account".to_string(),
            ApiError::MismatchPinning => "device identity does not match its pinned record".to_string(),
            ApiError::MismatchDowngrade => "report regresses a monotonic counter".to_string(),
            ApiError::Revoked => "device has been deleted".to_string(),
            ApiError::TooLarge => "request body too large".to_string(),
            ApiError::Conflict => "resource already exists".to_string(),
            ApiError::Internal(_) => "an internal error occurred".to_string(),
            ApiError::Database(_) => "an internal error occurred".to_string(),
        }
    }

    /// Converts the error into a JSON envelope response (`/api/*` surface).
    pub fn into_response_with_request_id(self, request_id: Uuid) -> Response {
        if matches!(self, ApiError::Internal(_) | ApiError::Database(_)) {
            tracing::error!(request_id = %request_id, error = %self, "internal error");
        }
        let status = self.status_code();
        let body = ApiErrorResponse::new(self.code(), self.safe_message(), request_id);
        (status, Json(body)).into_response()
    }

    /// Converts the error into a bare text/status response (`/challenge`,
    /// `/verify`, `/submit` surface, which never emits JSON).
    pub fn into_plain_response(self, verify_surface: bool) -> Response {
        if matches!(self, ApiError::Internal(_) | ApiError::Database(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let status = match (&self, verify_surface) {
            (ApiError::Unauthenticated, true) => StatusCode::BAD_REQUEST,
            _ => self.status_code(),
        };
        Response::builder()
            .status(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(Body::from(self.safe_message()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Wraps an `ApiError` with the request ID so it can be returned directly
/// from a handler as an `IntoResponse` (JSON-envelope surface).
pub struct ApiErrorWithRequestId {
    pub error: ApiError,
    pub request_id: Uuid,
}

impl IntoResponse for ApiErrorWithRequestId {
    fn into_response(self) -> Response {
        self.error.into_response_with_request_id(self.request_id)
    }
}

/// Wraps an `ApiError` for the plain-text attestation-endpoint surface.
/// `verify_surface` distinguishes `/verify` (where `Unauthenticated` maps to
/// 400) from `/challenge`/`/submit` (where the admin-surface 403 mapping
/// applies); see `ApiError::into_plain_response`.
pub struct PlainApiError {
    pub error: ApiError,
    pub verify_surface: bool,
}

impl PlainApiError {
    /// Builds a `/challenge` or `/submit` plain-text error (admin-surface
    /// status mapping).
    pub fn new(error: ApiError) -> Self {
        Self { error, verify_surface: false }
    }

    /// Builds a `/verify` plain-text error (`Unauthenticated` maps to 400).
    pub fn verify(error: ApiError) -> Self {
        Self { error, verify_surface: true }
    }
}

impl IntoResponse for PlainApiError {
    fn into_response(self) -> Response {
        self.error.into_plain_response(self.verify_surface)
    }
}
