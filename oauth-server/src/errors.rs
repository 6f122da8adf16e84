use axum::response::IntoResponse;
use axum::Json;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use oauth_core::OAuthError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OAuth 2.0 error body (RFC 6749 section 5.2)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub error: OAuthError,
    pub status_code: StatusCode,
}

impl ApiError {
    /// Create a new ApiError with an explicit status code
    pub fn new(error: OAuthError, status_code: StatusCode) -> Self {
        Self { error, status_code }
    }

    /// Create new Bad Request Error (400) with a detail message
    pub fn bad_request<S: ToString>(detail: S) -> Self {
        OAuthError::InvalidRequest(detail.to_string()).into()
    }

    fn challenge(&self) -> Option<HeaderValue> {
        if self.status_code != StatusCode::UNAUTHORIZED {
            return None;
        }
        match &self.error {
            OAuthError::InvalidClient(_) => Some(HeaderValue::from_static("Basic realm=\"oauth\"")),
            OAuthError::InvalidToken(_) => Some(HeaderValue::from_static(
                "Bearer realm=\"oauth\", error=\"invalid_token\"",
            )),
            _ => None,
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(error: OAuthError) -> Self {
        let status_code =
            StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { error, status_code }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let challenge = self.challenge();
        let body = ErrorResponse {
            error: self.error.code().to_string(),
            error_description: Some(self.error.description()),
        };
        let mut response = (self.status_code, Json(body)).into_response();
        if let Some(challenge) = challenge {
            response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_client_carries_basic_challenge() {
        let response = ApiError::from(OAuthError::InvalidClient("nope".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers()[WWW_AUTHENTICATE]
            .to_str()
            .unwrap()
            .starts_with("Basic"));
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_client");
        assert_eq!(body["error_description"], "nope");
    }

    #[tokio::test]
    async fn test_invalid_grant_is_bad_request() {
        let response = ApiError::from(OAuthError::InvalidGrant("used".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
    }

    #[tokio::test]
    async fn test_temporarily_unavailable() {
        let response =
            ApiError::from(OAuthError::TemporarilyUnavailable("slow".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "temporarily_unavailable");
    }
}
