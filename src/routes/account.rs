//! Account/device ingress adapters (component G) — §6 "JSON API surface"
//!
//! Session-authenticated, JSON-enveloped endpoints under `/api`. Every
//! handler here runs behind `SessionAuthLayer` except signup/login, which
//! establish the session in the first place.

use axum::{
    extract::{Extension, Path, State},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiErrorWithRequestId;
use crate::middleware::{SessionAuthLayer, SessionContext};
use crate::models::AttestationRow;
use crate::routes::AppState;
use crate::services::accounts;
use crate::types::ApiResponse;

pub fn router(state: &AppState) -> Router<AppState> {
    let authenticated = Router::new()
        .route("/logout", post(logout))
        .route("/logout-everywhere", post(logout_everywhere))
        .route("/account", get(get_account))
        .route("/devices.json", get(list_devices))
        .route("/attestation-history.json", post(attestation_history))
        .route("/delete-device/{fingerprint}", delete(delete_device))
        .route("/configuration", post(update_configuration))
        .route_layer(SessionAuthLayer::new(state.db.clone(), state.config.clone()));

    Router::new()
        .route("/create-account", post(create_account))
        .route("/login", post(login))
        .merge(authenticated)
}

fn request_id() -> Uuid {
    Uuid::new_v4()
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    username: String,
    password: String,
    email: Option<String>,
}

async fn create_account(
    State(state): State<AppState>,
    Json(body): Json<CreateAccountRequest>,
) -> Response {
    let request_id = request_id();
    match accounts::signup(
        &state.db,
        &body.username,
        &body.password,
        body.email.as_deref(),
        state.config.default_verify_interval,
        state.config.default_alert_delay,
    )
    .await
    {
        Ok(account) => Json(ApiResponse::new(account, request_id)).into_response(),
        Err(error) => ApiErrorWithRequestId { error, request_id }.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    cookie_token: String,
    request_token: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    let request_id = request_id();
    match accounts::login(&state.db, &body.username, &body.password, state.config.session_ttl_secs).await {
        Ok(session) => Json(ApiResponse::new(
            LoginResponse {
                cookie_token: hex::encode(&session.cookie_token),
                request_token: hex::encode(&session.request_token),
            },
            request_id,
        ))
        .into_response(),
        Err(error) => ApiErrorWithRequestId { error, request_id }.into_response(),
    }
}

async fn logout(State(state): State<AppState>, Extension(session): Extension<SessionContext>) -> Response {
    let request_id = request_id();
    match accounts::logout(&state.db, session.session_id).await {
        Ok(()) => Json(ApiResponse::new((), request_id)).into_response(),
        Err(error) => ApiErrorWithRequestId { error, request_id }.into_response(),
    }
}

async fn logout_everywhere(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    let request_id = request_id();
    match accounts::logout_everywhere(&state.db, session.user_id).await {
        Ok(()) => Json(ApiResponse::new((), request_id)).into_response(),
        Err(error) => ApiErrorWithRequestId { error, request_id }.into_response(),
    }
}

async fn get_account(State(state): State<AppState>, Extension(session): Extension<SessionContext>) -> Response {
    let request_id = request_id();
    match sqlx::query_as!(
        crate::models::Account,
        r#"SELECT user_id, username, password_salt, password_hash, subscribe_key,
            verify_interval, alert_delay, email, created_at, deletion_time
           FROM accounts WHERE user_id = $1"#,
        session.user_id,
    )
    .fetch_optional(&state.db)
    .await
    {
        Ok(Some(account)) => Json(ApiResponse::new(account, request_id)).into_response(),
        Ok(None) => {
            ApiErrorWithRequestId { error: crate::error::ApiError::Unauthenticated, request_id }.into_response()
        }
        Err(error) => {
            ApiErrorWithRequestId { error: crate::error::ApiError::Database(error), request_id }.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigurationRequest {
    verify_interval: Option<i64>,
    alert_delay: Option<i64>,
    email: Option<String>,
}

/// POST /api/configuration — session-authenticated account policy update
/// (§6, §8 Testable Property 7 "Configuration guard"). Only the account
/// policy itself is read back here; the bounds clients should validate
/// client-side live in `Config` and are not re-served by this endpoint.
async fn update_configuration(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(body): Json<UpdateConfigurationRequest>,
) -> Response {
    let request_id = request_id();

    if let Some(interval) = body.verify_interval {
        if interval < state.config.min_verify_interval || interval > state.config.max_verify_interval {
            return ApiErrorWithRequestId {
                error: crate::error::ApiError::Malformed("verify_interval out of bounds".into()),
                request_id,
            }
            .into_response();
        }
    }
    if let Some(delay) = body.alert_delay {
        if delay < state.config.min_alert_delay || delay > state.config.max_alert_delay {
            return ApiErrorWithRequestId {
                error: crate::error::ApiError::Malformed("alert_delay out of bounds".into()),
                request_id,
            }
            .into_response();
        }
    }

    // Testable Property 7: alertDelay > verifyInterval must hold for the
    // resulting row, not just each field independently against its own
    // bounds. When only one of the two is supplied, the other is read back
    // from the existing row so the comparison is against the effective value.
    if body.verify_interval.is_some() || body.alert_delay.is_some() {
        let existing = sqlx::query!(
            "SELECT verify_interval, alert_delay FROM accounts WHERE user_id = $1",
            session.user_id,
        )
        .fetch_optional(&state.db)
        .await;
        let existing = match existing {
            Ok(Some(row)) => row,
            Ok(None) => {
                return ApiErrorWithRequestId { error: crate::error::ApiError::Unauthenticated, request_id }
                    .into_response()
            }
            Err(error) => {
                return ApiErrorWithRequestId { error: crate::error::ApiError::Database(error), request_id }
                    .into_response()
            }
        };
        let effective_interval = body.verify_interval.unwrap_or(existing.verify_interval);
        let effective_delay = body.alert_delay.unwrap_or(existing.alert_delay);
        if effective_delay <= effective_interval {
            return ApiErrorWithRequestId {
                error: crate::error::ApiError::Malformed("alert_delay must exceed verify_interval".into()),
                request_id,
            }
            .into_response();
        }
    }

    let result = sqlx::query!(
        r#"
        UPDATE accounts SET
            verify_interval = COALESCE($2, verify_interval),
            alert_delay = COALESCE($3, alert_delay),
            email = COALESCE($4, email)
        WHERE user_id = $1
        "#,
        session.user_id,
        body.verify_interval,
        body.alert_delay,
        body.email,
    )
    .execute(&state.db)
    .await;

    match result {
        Ok(_) => Json(ApiResponse::new((), request_id)).into_response(),
        Err(error) => {
            ApiErrorWithRequestId { error: crate::error::ApiError::Database(error), request_id }.into_response()
        }
    }
}

async fn list_devices(State(state): State<AppState>, Extension(session): Extension<SessionContext>) -> Response {
    let request_id = request_id();
    match sqlx::query_as!(
        crate::models::Device,
        r#"
        SELECT
            fingerprint, pinned_certificate_0, pinned_certificate_1,
            pinned_certificate_2, pinned_certificate_3,
            pinned_verified_boot_key, verified_boot_hash,
            pinned_os_version, pinned_os_patch_level,
            pinned_vendor_patch_level, pinned_boot_patch_level,
            pinned_app_version,
            pinned_security_level as "pinned_security_level: crate::models::SecurityLevel",
            user_profile_secure, enrolled_biometrics, accessibility,
            adb_enabled, add_users_when_locked, deny_new_usb,
            oem_unlock_allowed, system_user, device_admin,
            user_id, verified_time_first, verified_time_last,
            expired_time_last, failure_time_last, deletion_time
        FROM devices WHERE user_id = $1 AND deletion_time IS NULL
        ORDER BY verified_time_last DESC
        "#,
        session.user_id,
    )
    .fetch_all(&state.db)
    .await
    {
        Ok(devices) => Json(ApiResponse::new(devices, request_id)).into_response(),
        Err(error) => {
            ApiErrorWithRequestId { error: crate::error::ApiError::Database(error), request_id }.into_response()
        }
    }
}

/// Page size for `/api/attestation-history.json` (§6).
const HISTORY_PAGE_SIZE: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    fingerprint: String,
    /// Cursor: only rows with `id <= offsetId` are returned. Omitted on the
    /// first page.
    offset_id: Option<i64>,
}

/// POST /api/attestation-history.json — keyset-paginated (by `id`, page size
/// 20) history for one device the caller owns (§6).
async fn attestation_history(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(body): Json<HistoryRequest>,
) -> Response {
    let request_id = request_id();
    let Ok(fingerprint) = hex::decode(&body.fingerprint) else {
        return ApiErrorWithRequestId {
            error: crate::error::ApiError::Malformed("fingerprint not hex".into()),
            request_id,
        }
        .into_response();
    };

    let owns = sqlx::query_scalar!(
        "SELECT 1 as \"exists!\" FROM devices WHERE fingerprint = $1 AND user_id = $2",
        fingerprint,
        session.user_id,
    )
    .fetch_optional(&state.db)
    .await;

    match owns {
        Ok(None) => {
            return ApiErrorWithRequestId { error: crate::error::ApiError::MismatchOwner, request_id }.into_response()
        }
        Err(error) => {
            return ApiErrorWithRequestId { error: crate::error::ApiError::Database(error), request_id }
                .into_response()
        }
        Ok(Some(_)) => {}
    }

    let offset_id = body.offset_id.unwrap_or(i64::MAX);
    match sqlx::query_as!(
        AttestationRow,
        r#"SELECT id, fingerprint, time, strong, tee_enforced, os_enforced
           FROM attestation_history
           WHERE fingerprint = $1 AND id <= $2
           ORDER BY id DESC
           LIMIT $3"#,
        fingerprint,
        offset_id,
        HISTORY_PAGE_SIZE,
    )
    .fetch_all(&state.db)
    .await
    {
        Ok(rows) => Json(ApiResponse::new(rows, request_id)).into_response(),
        Err(error) => {
            ApiErrorWithRequestId { error: crate::error::ApiError::Database(error), request_id }.into_response()
        }
    }
}

async fn delete_device(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(fingerprint_hex): Path<String>,
) -> Response {
    let request_id = request_id();
    let Ok(fingerprint) = hex::decode(&fingerprint_hex) else {
        return ApiErrorWithRequestId {
            error: crate::error::ApiError::Malformed("fingerprint not hex".into()),
            request_id,
        }
        .into_response();
    };

    let result = sqlx::query!(
        r#"UPDATE devices SET deletion_time = $3
           WHERE fingerprint = $1 AND user_id = $2 AND deletion_time IS NULL"#,
        fingerprint,
        session.user_id,
        chrono::Utc::now(),
    )
    .execute(&state.db)
    .await;

    match result {
        Ok(r) if r.rows_affected() == 0 => {
            ApiErrorWithRequestId { error: crate::error::ApiError::MismatchOwner, request_id }.into_response()
        }
        Ok(_) => Json(ApiResponse::new((), request_id)).into_response(),
        Err(error) => {
            ApiErrorWithRequestId { error: crate::error::ApiError::Database(error), request_id }.into_response()
        }
    }
}

