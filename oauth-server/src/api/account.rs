//! Browser sign-in and the bearer-protected user info resource

use crate::api::oauth::handlers::found;
use crate::auth::BearerPrincipal;
use crate::errors::{ApiError, ErrorResponse};
use crate::headers::presets;
use crate::openapi::ACCOUNT_TAG;
use crate::state::AppState;
use axum::{
    extract::{rejection::FormRejection, Form, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use oauth_core::credentials::verify_principal;
use oauth_core::store::bounded;
use oauth_core::OAuthError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Sign-in form
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Same-origin path to continue to, typically a pending `/authorize` request
    #[serde(default)]
    pub return_to: Option<String>,
}

/// The resource owner behind an access token
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub sub: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub role: String,
    pub scope: String,
    pub client_id: String,
}

/// Only relative paths on this origin are followed after sign-in
fn safe_return_to(return_to: Option<&str>) -> &str {
    match return_to {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path
        }
        _ => "/",
    }
}

/// Verifies a username and password and opens a session
#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 302, description = "Signed in; redirect to return_to"),
        (status = 400, description = "Malformed form", body = ErrorResponse),
        (status = 401, description = "Wrong username or password", body = ErrorResponse),
        (status = 503, description = "Credential store unavailable", body = ErrorResponse)
    ),
    tag = ACCOUNT_TAG
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    form: Result<Form<LoginRequest>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(request) = form.map_err(|rejection| {
        warn!("Malformed login request: {}", rejection);
        ApiError::bad_request("username and password are required")
    })?;

    let credentials = state.oauth.registry().credentials();
    let user = bounded(
        state.oauth.settings().store_timeout,
        verify_principal(credentials, &request.username, &request.password),
    )
    .await
    .map_err(OAuthError::from)?;

    let Some(user) = user else {
        warn!("Failed sign-in for username {}", request.username);
        return Err(ApiError::new(
            OAuthError::AccessDenied("invalid username or password".to_string()),
            StatusCode::UNAUTHORIZED,
        ));
    };

    let session_id = state.sessions.open(&user.id).await;
    info!("User {} signed in", user.id);

    let mut response = found(safe_return_to(request.return_to.as_deref()));
    if let Some(cookie) = state.sessions.cookie().issue(&session_id) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}

/// Ends the caller's session
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 204, description = "Signed out")
    ),
    tag = ACCOUNT_TAG
)]
pub(crate) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some((session_id, session)) = state.sessions.from_headers(&headers).await {
        state.sessions.close(&session_id).await;
        info!("User {} signed out", session.user_id);
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(cookie) = state.sessions.cookie().clear() {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

/// Describes the user an access token was issued for
#[utoipa::path(
    get,
    path = "/userinfo",
    responses(
        (status = 200, description = "Token owner", body = UserInfo),
        (status = 401, description = "Missing, unknown or expired bearer token", body = ErrorResponse)
    ),
    tag = ACCOUNT_TAG
)]
pub(crate) async fn userinfo(bearer: BearerPrincipal) -> Response {
    let BearerPrincipal { principal, token } = bearer;
    let body = UserInfo {
        sub: principal.id,
        username: principal.username,
        instance_id: principal.instance_id,
        role: principal.role.to_string(),
        scope: token.scope.to_string(),
        client_id: token.client_id,
    };
    let mut response = Json(body).into_response();
    presets::private_no_store().apply(&mut response);
    response
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/userinfo", get(userinfo))
}
