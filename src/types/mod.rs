//! API request/response envelope types
//!
//! Defines the standard JSON envelope used by the session-authenticated
//! `/api/*` surface. The attestation endpoints (`/challenge`, `/verify`,
//! `/submit`) use opaque bytes/text instead and do not go through this
//! envelope (§6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard API success response wrapper.
///
/// ```json
/// {
///   "data": { /* payload */ },
///   "meta": { "request_id": "uuid", "timestamp": "2026-07-29T10:00:00Z" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub meta: Meta,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, request_id: Uuid) -> Self {
        Self {
            data,
            meta: Meta::new(request_id),
        }
    }
}

/// Standard API error response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ErrorBody,
    pub meta: Meta,
}

impl ApiErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: Meta::new(request_id),
        }
    }
}

/// Error body containing a stable code and a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Response metadata containing request ID and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Meta {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}
