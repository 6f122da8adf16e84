//! OAuth 2.0 request and response bodies

use chrono::{DateTime, Utc};
use oauth_core::{Grant, GrantType, IntrospectedToken, IssuedTokens, OAuthError, TokenKind};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query of the authorization endpoint, documented for the OpenAPI schema
#[allow(dead_code)]
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeParams {
    /// Must be "code"
    pub response_type: String,
    /// Client identifier, the tenant's domain
    pub client_id: String,
    /// Must exactly equal the redirect URI registered for the client
    pub redirect_uri: String,
    /// Requested scopes (space-separated)
    pub scope: Option<String>,
    /// Opaque value echoed back to the client
    pub state: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (S256 or plain)
    pub code_challenge_method: Option<String>,
}

/// Token request (RFC 6749 sections 4.1.3 and 6)
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// "authorization_code" or "refresh_token"
    #[serde(default)]
    pub grant_type: Option<String>,
    /// Client identifier, when not sent with HTTP Basic authentication
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret, when not sent with HTTP Basic authentication
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Authorization code (authorization_code grant)
    #[serde(default)]
    pub code: Option<String>,
    /// Redirect URI used in the authorization request (authorization_code grant)
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// PKCE code verifier (authorization_code grant)
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// Refresh token (refresh_token grant)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Narrower scope (refresh_token grant)
    #[serde(default)]
    pub scope: Option<String>,
}

fn required(value: Option<String>, name: &str) -> Result<String, OAuthError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("{} is required", name)))
}

impl TokenRequest {
    /// Turns the form into the grant it describes
    pub fn grant(self) -> Result<Grant, OAuthError> {
        let grant_type = required(self.grant_type, "grant_type")?;
        match grant_type.parse::<GrantType>() {
            Ok(GrantType::AuthorizationCode) => Ok(Grant::AuthorizationCode {
                code: required(self.code, "code")?,
                redirect_uri: self.redirect_uri.filter(|uri| !uri.is_empty()),
                code_verifier: self.code_verifier.filter(|verifier| !verifier.is_empty()),
            }),
            Ok(GrantType::RefreshToken) => Ok(Grant::RefreshToken {
                refresh_token: required(self.refresh_token, "refresh_token")?,
                scope: self.scope.filter(|scope| !scope.is_empty()),
            }),
            Err(_) => Err(OAuthError::UnsupportedGrantType(grant_type)),
        }
    }
}

/// Client the tokens were issued to
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClientView {
    pub id: String,
}

/// User the tokens were issued for
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub role: String,
}

/// Token response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    /// Always "Bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Granted scopes (space-separated)
    pub scope: String,
    pub client: ClientView,
    pub user: UserView,
}

impl TokenResponse {
    pub fn new(issued: IssuedTokens, now: DateTime<Utc>) -> Self {
        let IssuedTokens { pair, client, user } = issued;
        Self {
            expires_in: pair.expires_in(now),
            scope: pair.scope.to_string(),
            access_token: pair.access_token,
            access_token_expires_at: pair.access_token_expires_at,
            refresh_token: pair.refresh_token,
            refresh_token_expires_at: pair.refresh_token_expires_at,
            token_type: "Bearer".to_string(),
            client: ClientView { id: client.id },
            user: UserView {
                id: user.id,
                username: user.username,
                instance_id: user.instance_id,
                role: user.role.to_string(),
            },
        }
    }
}

/// Token introspection request (RFC 7662 section 2.1)
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IntrospectionRequest {
    /// The token to introspect
    #[serde(default)]
    pub token: String,
    /// "access_token" or "refresh_token"; lookups try both regardless
    #[serde(default)]
    pub token_type_hint: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Token introspection response (RFC 7662 section 2.2)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntrospectionResponse {
    /// Whether the token is active
    pub active: bool,
    /// Token scopes (space-separated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Client the token was issued to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Username of the resource owner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// "access_token" or "refresh_token"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiration timestamp (Unix time)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// User identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Issuer of the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            username: None,
            token_type: None,
            exp: None,
            sub: None,
            iss: None,
        }
    }

    pub fn active(token: IntrospectedToken, issuer: &str) -> Self {
        let token_type = match token.kind {
            TokenKind::AccessToken => "access_token",
            TokenKind::RefreshToken => "refresh_token",
        };
        Self {
            active: true,
            exp: Some(token.expires_at().timestamp()),
            scope: Some(token.pair.scope.to_string()),
            client_id: Some(token.pair.client_id),
            username: Some(token.username),
            token_type: Some(token_type.to_string()),
            sub: Some(token.pair.user_id),
            iss: Some(issuer.to_string()),
        }
    }
}

/// Token revocation request (RFC 7009 section 2.1)
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevocationRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub token_type_hint: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}
