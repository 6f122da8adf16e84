//! Authorization Flow Handler.
//!
//! Implements the two legs of the authorization-code grant plus the
//! supporting operations around it:
//!
//! - [`AuthorizationServer::authorize`] validates an authorization request for
//!   an authenticated user and mints a single-use code.
//! - [`AuthorizationServer::exchange`] redeems a code or a refresh token for a
//!   new token pair.
//! - [`AuthorizationServer::authenticate_bearer`],
//!   [`AuthorizationServer::introspect`] and [`AuthorizationServer::revoke`]
//!   serve resource handlers and clients holding tokens.
//!
//! A presented code or refresh token is read, checked against the request,
//! and only then swapped for the new pair in a single store call. A
//! presentation that fails a check burns the credential, so a leaked code
//! cannot be retried against a different redirect URI or client. A store
//! failure during the swap leaves the old credential in place, so the client
//! can retry.

use crate::credentials::CredentialStore;
use crate::error::{OAuthError, StoreError};
use crate::model::{
    expires_after, now, AuthorizationCode, Client, ClientCredentials, GrantType, Principal, Scope,
    TokenPair,
};
use crate::policy::ScopePolicy;
use crate::registry::{ensure_grant, ClientRegistry};
use crate::secret::{
    fingerprint, generate_token, is_valid_pkce_value, verify_pkce, CodeChallengeMethod,
};
use crate::store::{bounded, TokenStore};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::{form_urlencoded, Url};

/// Lifetimes and switches of the flow
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub code_ttl: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Reject authorization requests without a `state` parameter
    pub require_state: bool,
    /// Reject authorization requests without a PKCE challenge
    pub require_pkce: bool,
    /// Upper bound on any single store call
    pub store_timeout: Duration,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(10 * 60),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            require_state: false,
            require_pkce: false,
            store_timeout: Duration::from_secs(2),
        }
    }
}

/// Parameters of the authorization endpoint, as received in the query string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

impl AuthorizationRequest {
    /// Re-encodes the request so it can be replayed after login
    pub fn query_string(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("response_type", &self.response_type);
        query.append_pair("client_id", &self.client_id);
        query.append_pair("redirect_uri", &self.redirect_uri);
        let optional = [
            ("scope", &self.scope),
            ("state", &self.state),
            ("code_challenge", &self.code_challenge),
            ("code_challenge_method", &self.code_challenge_method),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                query.append_pair(name, value);
            }
        }
        query.finish()
    }

    /// Location of the login page, carrying this request as the place to
    /// return to once the user is authenticated
    pub fn login_redirect(&self, authorize_path: &str, login_path: &str) -> String {
        let return_to = format!("{}?{}", authorize_path, self.query_string());
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("return_to", &return_to)
            .finish();
        format!("{}?{}", login_path, query)
    }

    fn state(&self) -> Option<&str> {
        self.state.as_deref().filter(|state| !state.is_empty())
    }
}

/// A freshly minted authorization code and where to send the browser
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: AuthorizationCode,
    /// The client's redirect URI with `code` and `state` appended
    pub redirect: Url,
}

/// A failed authorization request.
///
/// `redirect` is set once the redirect URI has been verified, in which case
/// the error is reported to the client by redirecting the browser there. When
/// it is `None` the error must be shown to the user directly.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct AuthorizeError {
    pub error: OAuthError,
    pub redirect: Option<Url>,
}

impl AuthorizeError {
    fn direct(error: OAuthError) -> Self {
        Self {
            error,
            redirect: None,
        }
    }

    fn redirected(error: OAuthError, redirect_uri: &Url, state: Option<&str>) -> Self {
        let mut url = redirect_uri.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("error", error.code());
            query.append_pair("error_description", &error.description());
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Self {
            error,
            redirect: Some(url),
        }
    }
}

/// What a client presents at the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode {
        code: String,
        /// Must match the authorization request when presented
        redirect_uri: Option<String>,
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        /// Optional narrowing of the previously granted scope
        scope: Option<String>,
    },
}

impl Grant {
    pub fn grant_type(&self) -> GrantType {
        match self {
            Grant::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            Grant::RefreshToken { .. } => GrantType::RefreshToken,
        }
    }
}

/// Result of a successful exchange
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub pair: TokenPair,
    pub client: Client,
    pub user: Principal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
}

/// An active token as seen by the client that owns it
#[derive(Debug, Clone)]
pub struct IntrospectedToken {
    pub kind: TokenKind,
    pub pair: TokenPair,
    pub username: String,
}

impl IntrospectedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self.kind {
            TokenKind::AccessToken => self.pair.access_token_expires_at,
            TokenKind::RefreshToken => self.pair.refresh_token_expires_at,
        }
    }
}

/// The authorization server: client registry, scope policy and token store
/// wired together.
#[derive(Debug, Clone)]
pub struct AuthorizationServer<S, C> {
    store: S,
    registry: ClientRegistry<C>,
    policy: ScopePolicy,
    settings: FlowSettings,
}

impl<S, C> AuthorizationServer<S, C>
where
    S: TokenStore,
    C: CredentialStore,
{
    pub fn new(store: S, credentials: C, policy: ScopePolicy, settings: FlowSettings) -> Self {
        Self {
            store,
            registry: ClientRegistry::new(credentials, settings.store_timeout),
            policy,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &ClientRegistry<C> {
        &self.registry
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        bounded(self.settings.store_timeout, operation).await
    }

    /// Validates an authorization request and mints a code.
    ///
    /// Checks run in a fixed order. Until the redirect URI is verified, errors
    /// are returned without a redirect; afterwards they carry one.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        principal: Option<&Principal>,
    ) -> Result<IssuedCode, AuthorizeError> {
        let Some(user) = principal else {
            return Err(AuthorizeError::direct(OAuthError::AuthenticationRequired));
        };

        if request.client_id.is_empty() || request.redirect_uri.is_empty() {
            return Err(AuthorizeError::direct(OAuthError::InvalidRequest(
                "client_id and redirect_uri are required".to_string(),
            )));
        }

        let client = self
            .registry
            .resolve(&request.client_id)
            .await
            .map_err(AuthorizeError::direct)?;

        let redirect = verify_redirect(&client, &request.redirect_uri).map_err(|err| {
            warn!(
                "Rejected redirect_uri for client_id {}: {}",
                client.id, request.redirect_uri
            );
            AuthorizeError::direct(err)
        })?;

        let state = request.state();
        let fail = |error: OAuthError| AuthorizeError::redirected(error, &redirect, state);

        if request.response_type != "code" {
            return Err(fail(OAuthError::UnsupportedResponseType(format!(
                "response_type '{}' is not supported",
                request.response_type
            ))));
        }

        if self.settings.require_state && state.is_none() {
            return Err(fail(OAuthError::InvalidRequest(
                "state is required".to_string(),
            )));
        }

        let (code_challenge, code_challenge_method) =
            self.pkce_parameters(request).map_err(&fail)?;

        ensure_grant(&client, GrantType::AuthorizationCode).map_err(&fail)?;

        let requested = Scope::parse(request.scope.as_deref().unwrap_or_default());
        let scope = self
            .policy
            .authorize(user, &client, &requested)
            .map_err(|err| {
                info!(
                    "Authorization denied for user {} on client_id {}: {}",
                    user.id, client.id, err
                );
                fail(err)
            })?;

        let code = AuthorizationCode {
            code: generate_token(),
            expires_at: expires_after(now(), self.settings.code_ttl),
            redirect_uri: client.redirect_uri.clone(),
            scope,
            client_id: client.id.clone(),
            user_id: user.id.clone(),
            code_challenge,
            code_challenge_method,
        };
        self.bounded(self.store.save_code(&code))
            .await
            .map_err(|err| fail(err.into()))?;

        let mut location = redirect.clone();
        {
            let mut query = location.query_pairs_mut();
            query.append_pair("code", &code.code);
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }

        info!(
            "Issued authorization code {} for user {} on client_id {}",
            fingerprint(&code.code),
            user.id,
            client.id
        );
        Ok(IssuedCode {
            code,
            redirect: location,
        })
    }

    fn pkce_parameters(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<(Option<String>, Option<CodeChallengeMethod>), OAuthError> {
        let challenge = request
            .code_challenge
            .as_deref()
            .filter(|challenge| !challenge.is_empty());
        let Some(challenge) = challenge else {
            if self.settings.require_pkce {
                return Err(OAuthError::InvalidRequest(
                    "code_challenge is required".to_string(),
                ));
            }
            return Ok((None, None));
        };

        let method = match request.code_challenge_method.as_deref() {
            None | Some("") => CodeChallengeMethod::Plain,
            Some(raw) => raw.parse().map_err(OAuthError::InvalidRequest)?,
        };
        if !is_valid_pkce_value(challenge) {
            return Err(OAuthError::InvalidRequest(
                "code_challenge is malformed".to_string(),
            ));
        }
        Ok((Some(challenge.to_string()), Some(method)))
    }

    /// Redeems a grant at the token endpoint
    pub async fn exchange(
        &self,
        credentials: &ClientCredentials,
        grant: Grant,
    ) -> Result<IssuedTokens, OAuthError> {
        let client = self.registry.authenticate(credentials).await?;
        ensure_grant(&client, grant.grant_type())?;

        match grant {
            Grant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                self.exchange_code(client, &code, redirect_uri.as_deref(), code_verifier.as_deref())
                    .await
            }
            Grant::RefreshToken {
                refresh_token,
                scope,
            } => {
                self.exchange_refresh_token(client, &refresh_token, scope.as_deref())
                    .await
            }
        }
    }

    async fn exchange_code(
        &self,
        client: Client,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<IssuedTokens, OAuthError> {
        if code.is_empty() {
            return Err(OAuthError::InvalidRequest("code is required".to_string()));
        }

        let stored = self
            .bounded(self.store.find_code(code))
            .await?
            .ok_or_else(|| {
                warn!(
                    "Unknown or already redeemed authorization code {} presented by client_id {}",
                    fingerprint(code),
                    client.id
                );
                already_used_code()
            })?;

        // Store failures leave the code alone; rejected presentations burn it
        let (user, scope) = match self
            .check_code(&client, &stored, redirect_uri, code_verifier)
            .await
        {
            Ok(granted) => granted,
            Err(err @ OAuthError::InvalidGrant(_)) => {
                if let Err(burn) = self.bounded(self.store.take_code(code)).await {
                    warn!(
                        "Failed to consume rejected authorization code {}: {}",
                        fingerprint(code),
                        burn
                    );
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let pair = self.mint_pair(&client, &user, scope);
        if !self.bounded(self.store.redeem_code(code, &pair)).await? {
            warn!(
                "Authorization code {} was redeemed concurrently, dropping the pair minted for client_id {}",
                fingerprint(code),
                client.id
            );
            return Err(already_used_code());
        }
        Ok(self.issued(pair, client, user))
    }

    /// Validates a stored code against the token request and re-derives the
    /// scope from the user's current standing.
    async fn check_code(
        &self,
        client: &Client,
        stored: &AuthorizationCode,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<(Principal, Scope), OAuthError> {
        if stored.is_expired(now()) {
            return Err(OAuthError::InvalidGrant(
                "authorization code has expired".to_string(),
            ));
        }
        if stored.client_id != client.id {
            warn!(
                "Client_id {} presented a code issued to {}",
                client.id, stored.client_id
            );
            return Err(OAuthError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }
        if let Some(redirect_uri) = redirect_uri {
            if redirect_uri != stored.redirect_uri {
                return Err(OAuthError::InvalidGrant(
                    "redirect_uri does not match the authorization request".to_string(),
                ));
            }
        }
        if let (Some(challenge), Some(method)) =
            (&stored.code_challenge, stored.code_challenge_method)
        {
            let Some(verifier) = code_verifier else {
                return Err(OAuthError::InvalidGrant(
                    "code_verifier is required".to_string(),
                ));
            };
            if !verify_pkce(challenge, method, verifier) {
                return Err(OAuthError::InvalidGrant(
                    "code_verifier does not match the code_challenge".to_string(),
                ));
            }
        }

        let user = self.load_user(&stored.user_id).await?;
        let scope = self.policy.reauthorize(&user, client, &stored.scope)?;
        Ok((user, scope))
    }

    async fn exchange_refresh_token(
        &self,
        client: Client,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<IssuedTokens, OAuthError> {
        if refresh_token.is_empty() {
            return Err(OAuthError::InvalidRequest(
                "refresh_token is required".to_string(),
            ));
        }

        let previous = self
            .bounded(self.store.find_refresh_token(refresh_token))
            .await?
            .ok_or_else(|| {
                warn!(
                    "Unknown or already rotated refresh token {} presented by client_id {}",
                    fingerprint(refresh_token),
                    client.id
                );
                revoked_refresh_token()
            })?;

        if let Err(err) = check_refresh_token(&client, &previous) {
            if let Err(burn) = self.bounded(self.store.take_refresh_token(refresh_token)).await {
                warn!(
                    "Failed to consume rejected refresh token {}: {}",
                    fingerprint(refresh_token),
                    burn
                );
            }
            return Err(err);
        }

        let requested = scope.map(Scope::parse).filter(|scope| !scope.is_empty());
        let carried = match requested {
            Some(requested) if !requested.is_subset(&previous.scope) => {
                return Err(OAuthError::InvalidScope(format!(
                    "scope '{}' exceeds the original grant '{}'",
                    requested, previous.scope
                )));
            }
            Some(requested) => requested,
            None => previous.scope.clone(),
        };

        let user = self.load_user(&previous.user_id).await?;
        let scope = self.policy.reauthorize(&user, &client, &carried)?;
        let pair = self.mint_pair(&client, &user, scope);
        if !self
            .bounded(self.store.rotate_refresh_token(refresh_token, &pair))
            .await?
        {
            warn!(
                "Refresh token {} was rotated concurrently for client_id {}",
                fingerprint(refresh_token),
                client.id
            );
            return Err(revoked_refresh_token());
        }
        Ok(self.issued(pair, client, user))
    }

    async fn load_user(&self, user_id: &str) -> Result<Principal, OAuthError> {
        self.bounded(self.registry.credentials().find_user_by_id(user_id))
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("user no longer exists".to_string()))
    }

    fn mint_pair(&self, client: &Client, user: &Principal, scope: Scope) -> TokenPair {
        let issued_at = now();
        TokenPair {
            access_token: generate_token(),
            access_token_expires_at: expires_after(
                issued_at,
                client.access_ttl(self.settings.access_token_ttl),
            ),
            refresh_token: generate_token(),
            refresh_token_expires_at: expires_after(
                issued_at,
                client.refresh_ttl(self.settings.refresh_token_ttl),
            ),
            scope,
            client_id: client.id.clone(),
            user_id: user.id.clone(),
        }
    }

    fn issued(&self, pair: TokenPair, client: Client, user: Principal) -> IssuedTokens {
        info!(
            "Issued access token {} for user {} on client_id {} with scope '{}'",
            fingerprint(&pair.access_token),
            user.id,
            client.id,
            pair.scope
        );
        IssuedTokens { pair, client, user }
    }

    /// Resolves a bearer access token to its pair and the user it was issued to
    pub async fn authenticate_bearer(
        &self,
        access_token: &str,
    ) -> Result<(TokenPair, Principal), OAuthError> {
        if access_token.is_empty() {
            return Err(OAuthError::InvalidToken("missing access token".to_string()));
        }
        let pair = self
            .bounded(self.store.find_access_token(access_token))
            .await?
            .ok_or_else(|| OAuthError::InvalidToken("access token is invalid".to_string()))?;
        if pair.is_access_expired(now()) {
            return Err(OAuthError::InvalidToken("access token has expired".to_string()));
        }
        let user = self
            .bounded(self.registry.credentials().find_user_by_id(&pair.user_id))
            .await?
            .ok_or_else(|| OAuthError::InvalidToken("token owner no longer exists".to_string()))?;
        Ok((pair, user))
    }

    /// Reports whether a token is active, for the client it was issued to.
    ///
    /// Tokens belonging to other clients are reported as inactive.
    pub async fn introspect(
        &self,
        credentials: &ClientCredentials,
        token: &str,
    ) -> Result<Option<IntrospectedToken>, OAuthError> {
        let client = self.registry.authenticate(credentials).await?;
        let Some((kind, pair)) = self.find_pair(token).await? else {
            return Ok(None);
        };

        let current = now();
        let expired = match kind {
            TokenKind::AccessToken => pair.is_access_expired(current),
            TokenKind::RefreshToken => pair.is_refresh_expired(current),
        };
        if expired || pair.client_id != client.id {
            return Ok(None);
        }

        let username = self
            .bounded(self.registry.credentials().find_user_by_id(&pair.user_id))
            .await?
            .map(|user| user.username);
        Ok(username.map(|username| IntrospectedToken {
            kind,
            pair,
            username,
        }))
    }

    /// Revokes the pair a token belongs to (RFC 7009).
    ///
    /// Unknown tokens and tokens of other clients are ignored.
    pub async fn revoke(&self, credentials: &ClientCredentials, token: &str) -> Result<(), OAuthError> {
        let client = self.registry.authenticate(credentials).await?;
        let Some((_, pair)) = self.find_pair(token).await? else {
            debug!("Revocation of unknown token {} ignored", fingerprint(token));
            return Ok(());
        };
        if pair.client_id != client.id {
            warn!(
                "Client_id {} tried to revoke a token issued to {}",
                client.id, pair.client_id
            );
            return Ok(());
        }
        if self.bounded(self.store.revoke(token)).await? {
            info!(
                "Revoked token pair {} for client_id {}",
                fingerprint(&pair.access_token),
                client.id
            );
        }
        Ok(())
    }

    async fn find_pair(&self, token: &str) -> Result<Option<(TokenKind, TokenPair)>, OAuthError> {
        if token.is_empty() {
            return Err(OAuthError::InvalidRequest("token is required".to_string()));
        }
        if let Some(pair) = self.bounded(self.store.find_access_token(token)).await? {
            return Ok(Some((TokenKind::AccessToken, pair)));
        }
        Ok(self
            .bounded(self.store.find_refresh_token(token))
            .await?
            .map(|pair| (TokenKind::RefreshToken, pair)))
    }

    /// Deletes expired codes and tokens from the store
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.store.purge_expired(now()).await
    }
}

/// Exact string comparison against the registered URI, then a parse so that
/// parameters can be appended
fn already_used_code() -> OAuthError {
    OAuthError::InvalidGrant("authorization code is invalid or has already been used".to_string())
}

fn revoked_refresh_token() -> OAuthError {
    OAuthError::InvalidGrant("refresh token is invalid or has been revoked".to_string())
}

fn check_refresh_token(client: &Client, previous: &TokenPair) -> Result<(), OAuthError> {
    if previous.is_refresh_expired(now()) {
        return Err(OAuthError::InvalidGrant(
            "refresh token has expired".to_string(),
        ));
    }
    if previous.client_id != client.id {
        warn!(
            "Client_id {} presented a refresh token issued to {}",
            client.id, previous.client_id
        );
        return Err(OAuthError::InvalidGrant(
            "refresh token was issued to another client".to_string(),
        ));
    }
    Ok(())
}

fn verify_redirect(client: &Client, presented: &str) -> Result<Url, OAuthError> {
    if presented != client.redirect_uri {
        return Err(OAuthError::InvalidRedirect);
    }
    let url = Url::parse(presented).map_err(|_| OAuthError::InvalidRedirect)?;
    if url.fragment().is_some() {
        return Err(OAuthError::InvalidRedirect);
    }
    Ok(url)
}
