//! OAuth 2.0 Authorization Server endpoints
//!
//! ## Supported flows
//! - Authorization Code Grant with optional PKCE (RFC 6749 Section 4.1, RFC 7636)
//! - Refresh Token Grant with rotation (RFC 6749 Section 6)
//! - Token Introspection (RFC 7662)
//! - Token Revocation (RFC 7009)
//!
//! Clients are tenant instances; the client id is the tenant's domain.

pub mod client_auth;
pub mod handlers;
pub mod models;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Creates OAuth 2.0 routes
pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route(handlers::AUTHORIZE_PATH, get(handlers::authorize))
        .route("/token", post(handlers::token))
        .route("/introspect", post(handlers::introspect))
        .route("/revoke", post(handlers::revoke))
}
