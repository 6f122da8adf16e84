use std::time::Duration;
use thiserror::Error;

/// Protocol-level failures, named after the RFC 6749 error codes they render as.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OAuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid client: {0}")]
    InvalidClient(String),
    /// The presented redirect URI does not match the registered one. Never
    /// redirected, the browser is shown the error instead.
    #[error("redirect_uri does not match the registered redirect URI")]
    InvalidRedirect,
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),
    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// Bearer token missing, unknown, or expired (RFC 6750).
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// No authenticated principal; the caller should send the user to log in.
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("server error: {0}")]
    ServerError(String),
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
}

impl OAuthError {
    /// The `error` value put on the wire
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) | OAuthError::InvalidRedirect => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::AccessDenied(_) => "access_denied",
            OAuthError::InvalidToken(_) => "invalid_token",
            OAuthError::AuthenticationRequired => "login_required",
            OAuthError::ServerError(_) => "server_error",
            OAuthError::TemporarilyUnavailable(_) => "temporarily_unavailable",
        }
    }

    /// Human readable `error_description`
    pub fn description(&self) -> String {
        match self {
            OAuthError::InvalidRequest(detail)
            | OAuthError::InvalidClient(detail)
            | OAuthError::InvalidGrant(detail)
            | OAuthError::UnauthorizedClient(detail)
            | OAuthError::UnsupportedGrantType(detail)
            | OAuthError::UnsupportedResponseType(detail)
            | OAuthError::InvalidScope(detail)
            | OAuthError::AccessDenied(detail)
            | OAuthError::InvalidToken(detail)
            | OAuthError::ServerError(detail)
            | OAuthError::TemporarilyUnavailable(detail) => detail.clone(),
            OAuthError::InvalidRedirect => {
                "redirect_uri does not match the registered redirect URI".to_string()
            }
            OAuthError::AuthenticationRequired => "user authentication is required".to_string(),
        }
    }

    /// HTTP status the error is returned with when it is not redirected
    pub fn status(&self) -> u16 {
        match self {
            OAuthError::InvalidClient(_)
            | OAuthError::InvalidToken(_)
            | OAuthError::AuthenticationRequired => 401,
            OAuthError::ServerError(_) => 500,
            OAuthError::TemporarilyUnavailable(_) => 503,
            _ => 400,
        }
    }
}

/// Failures raised by the persistence backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store configuration error: {0}")]
    Config(String),
    #[error("failed to (de)serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(_) => OAuthError::TemporarilyUnavailable(err.to_string()),
            other => OAuthError::ServerError(other.to_string()),
        }
    }
}
