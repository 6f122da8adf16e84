//! OAuth 2.0 endpoint handlers

use crate::api::oauth::client_auth::client_credentials;
use crate::api::oauth::models::{
    AuthorizeParams, IntrospectionRequest, IntrospectionResponse, RevocationRequest, TokenRequest,
    TokenResponse,
};
use crate::auth::SessionPrincipal;
use crate::errors::{ApiError, ErrorResponse};
use crate::headers::presets;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Form, FromRequest, Query, Request, State,
    },
    http::{
        header::{CONTENT_TYPE, LOCATION},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use log::{error, info, warn};
use oauth_core::model::now;
use oauth_core::secret::fingerprint;
use oauth_core::{AuthorizationRequest, AuthorizeError, OAuthError};
use serde::de::DeserializeOwned;

pub(crate) const AUTHORIZE_PATH: &str = "/authorize";

/// 302 Found; axum's `Redirect::to` answers 303
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

fn log_failure(endpoint: &str, client_id: &str, error: &OAuthError) {
    match error {
        OAuthError::ServerError(_) | OAuthError::TemporarilyUnavailable(_) => {
            error!("{} failed for client_id {}: {}", endpoint, client_id, error)
        }
        _ => warn!("{} rejected for client_id {}: {}", endpoint, client_id, error),
    }
}

/// OAuth 2.0 Authorization endpoint (RFC 6749 Section 4.1.1)
#[utoipa::path(
    get,
    path = "/authorize",
    params(AuthorizeParams),
    responses(
        (status = 302, description = "Redirect to the client with a code or an error, or to the login page"),
        (status = 400, description = "Invalid request, unknown client or redirect URI mismatch", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = OAUTH_TAG
)]
pub async fn authorize(
    State(state): State<AppState>,
    SessionPrincipal(principal): SessionPrincipal,
    query: Result<Query<AuthorizationRequest>, QueryRejection>,
) -> Response {
    let request = match query {
        Ok(Query(request)) => request,
        Err(rejection) => {
            warn!("Malformed authorization request: {}", rejection);
            return ApiError::bad_request("malformed query string").into_response();
        }
    };
    info!(
        "Authorization request from client_id {} (authenticated: {})",
        request.client_id,
        principal.is_some()
    );

    match state.oauth.authorize(&request, principal.as_ref()).await {
        Ok(issued) => {
            info!(
                "Issued authorization code {} to client_id {} for user {}",
                fingerprint(&issued.code.code),
                issued.code.client_id,
                issued.code.user_id
            );
            found(issued.redirect.as_str())
        }
        Err(AuthorizeError {
            error: OAuthError::AuthenticationRequired,
            ..
        }) => found(&request.login_redirect(AUTHORIZE_PATH, &state.config.oauth.login_path)),
        Err(AuthorizeError {
            error,
            redirect: Some(redirect),
        }) => {
            log_failure("Authorization", &request.client_id, &error);
            found(redirect.as_str())
        }
        Err(AuthorizeError {
            error,
            redirect: None,
        }) => {
            log_failure("Authorization", &request.client_id, &error);
            // The browser is looking at this page, not the client: no Basic challenge
            match error {
                OAuthError::InvalidClient(_) => ApiError::new(error, StatusCode::BAD_REQUEST),
                error => ApiError::from(error),
            }
            .into_response()
        }
    }
}

/// OAuth 2.0 Token endpoint (RFC 6749 Sections 4.1.3 and 6)
#[utoipa::path(
    post,
    path = "/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token pair issued", body = TokenResponse),
        (status = 400, description = "Invalid request or grant", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = OAUTH_TAG
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let mut response = match exchange(&state, &headers, form).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    };
    presets::no_store().apply(&mut response);
    response
}

async fn exchange(
    state: &AppState,
    headers: &HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<TokenResponse, ApiError> {
    let Form(mut request) = form.map_err(|rejection| {
        warn!("Malformed token request: {}", rejection);
        ApiError::bad_request("request body must be application/x-www-form-urlencoded")
    })?;

    let credentials = client_credentials(
        headers,
        request.client_id.as_deref(),
        request.client_secret.take().as_deref(),
    )
    .inspect_err(|e| log_failure("Token request", request.client_id.as_deref().unwrap_or("-"), e))?;
    info!(
        "Token request from client_id {} with grant_type {}",
        credentials.client_id,
        request.grant_type.as_deref().unwrap_or("-")
    );

    let client_id = credentials.client_id.clone();
    let result = match request.grant() {
        Ok(grant) => state.oauth.exchange(&credentials, grant).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(issued) => {
            info!(
                "Issued token pair {} to client_id {} for user {}",
                fingerprint(&issued.pair.access_token),
                issued.client.id,
                issued.user.id
            );
            Ok(TokenResponse::new(issued, now()))
        }
        Err(e) => {
            log_failure("Token request", &client_id, &e);
            Err(e.into())
        }
    }
}

/// Accepts a body as JSON when the request says so, as a form otherwise
pub struct FormOrJson<T>(pub T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            match Json::<T>::from_request(req, state).await {
                Ok(Json(value)) => Ok(Self(value)),
                Err(_) => Err(ApiError::bad_request("Invalid JSON in request body")),
            }
        } else {
            match Form::<T>::from_request(req, state).await {
                Ok(Form(value)) => Ok(Self(value)),
                Err(_) => Err(ApiError::bad_request("Invalid form data in request body")),
            }
        }
    }
}

/// OAuth 2.0 Token Introspection endpoint (RFC 7662)
///
/// Supports both form-encoded and JSON request bodies
#[utoipa::path(
    post,
    path = "/introspect",
    request_body = IntrospectionRequest,
    responses(
        (status = 200, description = "Token introspection result", body = IntrospectionResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = OAUTH_TAG
)]
pub async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    FormOrJson(request): FormOrJson<IntrospectionRequest>,
) -> Result<Response, ApiError> {
    let credentials = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    info!(
        "Introspection request from client_id {} (hint: {})",
        credentials.client_id,
        request.token_type_hint.as_deref().unwrap_or("-")
    );

    let body = match state.oauth.introspect(&credentials, &request.token).await {
        Ok(Some(token)) => IntrospectionResponse::active(token, &state.config.issuer),
        Ok(None) => IntrospectionResponse::inactive(),
        Err(e) => {
            log_failure("Introspection", &credentials.client_id, &e);
            return Err(e.into());
        }
    };
    let mut response = Json(body).into_response();
    presets::no_store().apply(&mut response);
    Ok(response)
}

/// OAuth 2.0 Token Revocation endpoint (RFC 7009)
#[utoipa::path(
    post,
    path = "/revoke",
    request_body(content = RevocationRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token revoked, or it was not active"),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = OAUTH_TAG
)]
pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    FormOrJson(request): FormOrJson<RevocationRequest>,
) -> Result<StatusCode, ApiError> {
    let credentials = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    info!(
        "Revocation request from client_id {} (hint: {})",
        credentials.client_id,
        request.token_type_hint.as_deref().unwrap_or("-")
    );

    state
        .oauth
        .revoke(&credentials, &request.token)
        .await
        .inspect_err(|e| log_failure("Revocation", &credentials.client_id, e))?;
    Ok(StatusCode::OK)
}
