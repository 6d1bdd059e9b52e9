//! Middleware modules
//!
//! Authentication middleware for protecting the session-authenticated
//! `/api/*` surface.

pub mod session_auth;

pub use session_auth::{SessionAuthLayer, SessionContext};
