//! Request extractors for the two ways a caller proves who they are: a
//! browser session cookie, or an OAuth bearer token. Handlers compose them.

use crate::errors::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use http::header::AUTHORIZATION;
use http::request::Parts;
use log::{debug, warn};
use oauth_core::store::bounded;
use oauth_core::{CredentialStore, OAuthError, Principal, TokenPair};

/// The signed-in user, if the request carries a live session.
///
/// The principal is re-read from the credential store, so a user deleted
/// since signing in resolves to `None`.
#[derive(Debug, Clone)]
pub struct SessionPrincipal(pub Option<Principal>);

impl FromRequestParts<AppState> for SessionPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some((session_id, session)) = state.sessions.from_headers(&parts.headers).await else {
            return Ok(Self(None));
        };

        let credentials = state.oauth.registry().credentials();
        let user = bounded(
            state.oauth.settings().store_timeout,
            credentials.find_user_by_id(&session.user_id),
        )
        .await
        .map_err(OAuthError::from)?;

        if user.is_none() {
            debug!(
                "Session user {} (signed in at {}) no longer exists",
                session.user_id, session.created_at
            );
            state.sessions.close(&session_id).await;
        }
        Ok(Self(user))
    }
}

/// The principal behind a valid `Authorization: Bearer` access token
#[derive(Debug, Clone)]
pub struct BearerPrincipal {
    pub principal: Principal,
    pub token: TokenPair,
}

fn bearer_token(parts: &Parts) -> Result<&str, OAuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| OAuthError::InvalidToken("missing bearer token".to_string()))?;
    let value = header
        .to_str()
        .map_err(|_| OAuthError::InvalidToken("malformed authorization header".to_string()))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(OAuthError::InvalidToken(
            "authorization header is not a bearer token".to_string(),
        )),
    }
}

impl FromRequestParts<AppState> for BearerPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).inspect_err(|e| warn!("Bearer authentication failed: {}", e))?;
        let (token, principal) = state.oauth.authenticate_bearer(token).await?;
        Ok(Self { principal, token })
    }
}
