//! Session authentication middleware (component G) — §6 "Session
//! authentication"
//!
//! Validates the `__Host-` session cookie against the database, enforces
//! double-submit CSRF (the cookie token must be paired with a matching
//! `x-csrf-token` header), and checks the request's `Origin` against the
//! configured canonical origin. On success, injects a `SessionContext` into
//! request extensions for handlers to read via `Extension<SessionContext>`.

use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use sqlx::PgPool;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::services::accounts;

const SESSION_COOKIE_NAME: &str = "__Host-session";
const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Authenticated session identity, injected into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    pub user_id: i64,
    pub session_id: i64,
}

#[derive(Clone)]
pub struct SessionAuthLayer {
    db: PgPool,
    config: Arc<Config>,
}

impl SessionAuthLayer {
    pub fn new(db: PgPool, config: Arc<Config>) -> Self {
        Self { db, config }
    }
}

impl<S> Layer<S> for SessionAuthLayer {
    type Service = SessionAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionAuthMiddleware {
            inner,
            db: self.db.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SessionAuthMiddleware<S> {
    inner: S,
    db: PgPool,
    config: Arc<Config>,
}

impl<S> Service<Request<Body>> for SessionAuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let db = self.db.clone();
        let config = self.config.clone();
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        Box::pin(async move {
            match authenticate_request(&request, &db, &config).await {
                Ok(context) => {
                    let mut request = request;
                    request.extensions_mut().insert(context);
                    inner.call(request).await
                }
                Err(error) => Ok(error.into_error_response()),
            }
        })
    }
}

/// Errors this middleware can produce before a handler ever runs.
enum SessionAuthError {
    BadOrigin,
    Api(ApiError),
}

impl SessionAuthError {
    fn into_error_response(self) -> Response {
        match self {
            SessionAuthError::BadOrigin => {
                tracing::warn!("rejected request with mismatched origin");
                StatusCode::FORBIDDEN.into_response()
            }
            SessionAuthError::Api(error) => {
                error.into_response_with_request_id(Uuid::new_v4())
            }
        }
    }
}

async fn authenticate_request(
    request: &Request<Body>,
    db: &PgPool,
    config: &Config,
) -> Result<SessionContext, SessionAuthError> {
    check_origin(request, config)?;

    let cookie_token = extract_cookie(request, SESSION_COOKIE_NAME)
        .ok_or(SessionAuthError::Api(ApiError::Unauthenticated))?;
    let request_token = request
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .ok_or(SessionAuthError::Api(ApiError::Unauthenticated))?;

    let cookie_bytes = hex::decode(cookie_token).map_err(|_| SessionAuthError::Api(ApiError::Unauthenticated))?;
    let request_bytes =
        hex::decode(request_token).map_err(|_| SessionAuthError::Api(ApiError::Unauthenticated))?;

    let session = accounts::authenticate(db, &cookie_bytes, &request_bytes)
        .await
        .map_err(SessionAuthError::Api)?;

    Ok(SessionContext {
        user_id: session.user_id,
        session_id: session.session_id,
    })
}

/// Rejects cross-origin requests (§6: Origin must match the canonical
/// origin this server presents itself as). Requests without an `Origin`
/// header (same-origin navigations, non-browser clients) are allowed
/// through for the session lookup to adjudicate.
fn check_origin(request: &Request<Body>, config: &Config) -> Result<(), SessionAuthError> {
    if let Some(origin) = request.headers().get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        if origin != config.canonical_origin {
            return Err(SessionAuthError::BadOrigin);
        }
    }
    Ok(())
}

fn extract_cookie<'a>(request: &'a Request<Body>, name: &str) -> Option<&'a str> {
    let header = request.headers().get(header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}
