//! Records shared by the registry, the authorizer, the stores and the flow handler.
//!
//! Every timestamp is UTC with whole-second resolution and a row counts as
//! expired once `now >= expires_at`.

use crate::secret::CodeChallengeMethod;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Current time truncated to whole seconds
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// `now + ttl`, saturating at the largest representable timestamp
pub fn expires_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(format!("unknown grant type '{}'", other)),
        }
    }
}

fn default_grants() -> BTreeSet<GrantType> {
    BTreeSet::from([GrantType::AuthorizationCode, GrantType::RefreshToken])
}

/// A set of scope tokens, space-delimited on the wire.
///
/// Stored as an ordered set so that rendering is stable and duplicates
/// collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope(BTreeSet<String>);

impl Scope {
    pub fn parse(raw: &str) -> Self {
        raw.split_whitespace().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn intersection(&self, other: &Scope) -> Scope {
        Scope(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn is_subset(&self, other: &Scope) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl<S: Into<String>> FromIterator<S> for Scope {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Scope(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(token)?;
        }
        Ok(())
    }
}

impl FromStr for Scope {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Scope::parse(s))
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Scope::parse(&raw))
    }
}

/// A tenant instance registered as an OAuth client.
///
/// The client id is the tenant's domain, the same value users carry in
/// [`Principal::instance_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_grants")]
    pub allowed_grants: BTreeSet<GrantType>,
    /// Per-client access token lifetime in seconds, overriding the server default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_ttl: Option<u64>,
    /// Per-client refresh token lifetime in seconds, overriding the server default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_ttl: Option<u64>,
}

impl Client {
    pub fn new(id: impl Into<String>, secret: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            redirect_uri: redirect_uri.into(),
            allowed_grants: default_grants(),
            access_token_ttl: None,
            refresh_token_ttl: None,
        }
    }

    pub fn allows(&self, grant: GrantType) -> bool {
        self.allowed_grants.contains(&grant)
    }

    pub fn access_ttl(&self, fallback: Duration) -> Duration {
        self.access_token_ttl.map(Duration::from_secs).unwrap_or(fallback)
    }

    pub fn refresh_ttl(&self, fallback: Duration) -> Duration {
        self.refresh_token_ttl.map(Duration::from_secs).unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "admins")]
    Admin,
    #[serde(alias = "editors")]
    Editor,
    #[default]
    #[serde(alias = "viewers")]
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" | "admins" => Ok(Role::Admin),
            "editor" | "editors" => Ok(Role::Editor),
            "viewer" | "viewers" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// An authenticated platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Tenant the user belongs to; platform administrators may have none
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn belongs_to(&self, client: &Client) -> bool {
        self.instance_id.as_deref() == Some(client.id.as_str())
    }
}

/// A single-use grant issued after user consent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub redirect_uri: String,
    pub scope: Scope,
    pub client_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<CodeChallengeMethod>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// An access token and the refresh token minted alongside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub scope: Scope,
    pub client_id: String,
    pub user_id: String,
}

impl TokenPair {
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_token_expires_at
    }

    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_token_expires_at
    }

    /// Seconds until the access token expires, never negative
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.access_token_expires_at - now).num_seconds().max(0)
    }
}

/// Client id and secret as presented at the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_and_render() {
        let scope = Scope::parse("  write auth  read auth ");
        assert_eq!(scope.len(), 3);
        assert_eq!(scope.to_string(), "auth read write");
        assert!(Scope::parse("").is_empty());
    }

    #[test]
    fn test_scope_set_operations() {
        let granted = Scope::parse("auth read");
        let requested = Scope::parse("read admin");
        assert_eq!(requested.intersection(&granted), Scope::parse("read"));
        assert!(Scope::parse("auth").is_subset(&granted));
        assert!(!requested.is_subset(&granted));
    }

    #[test]
    fn test_scope_serializes_as_string() {
        let json = serde_json::to_string(&Scope::parse("read auth")).unwrap();
        assert_eq!(json, "\"auth read\"");
        let scope: Scope = serde_json::from_str("\"auth read\"").unwrap();
        assert!(scope.contains("read"));
    }

    #[test]
    fn test_role_aliases() {
        assert_eq!("admins".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Editor".parse::<Role>().unwrap(), Role::Editor);
        assert!("owner".parse::<Role>().is_err());
        let role: Role = serde_json::from_str("\"viewers\"").unwrap();
        assert_eq!(role, Role::Viewer);
    }

    #[test]
    fn test_secrets_are_never_serialized() {
        let client = Client::new("acme.example", "top-secret", "https://acme.example/cb");
        let json = serde_json::to_value(&client).unwrap();
        assert!(json.get("secret").is_none());

        let user = Principal {
            id: "1".into(),
            username: "alice".into(),
            password_hash: "$2b$04$hash".into(),
            instance_id: Some("acme.example".into()),
            role: Role::Editor,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "editor");
    }

    #[test]
    fn test_client_defaults_allow_both_grants() {
        let client: Client = serde_json::from_str(
            r#"{"id":"acme.example","secret":"s","redirect_uri":"https://acme.example/cb"}"#,
        )
        .unwrap();
        assert_eq!(client.secret, "s");
        assert!(client.allows(GrantType::AuthorizationCode));
        assert!(client.allows(GrantType::RefreshToken));
        assert_eq!(client.access_ttl(Duration::from_secs(900)), Duration::from_secs(900));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = now();
        let code = AuthorizationCode {
            code: "c".into(),
            expires_at: now,
            redirect_uri: "https://acme.example/cb".into(),
            scope: Scope::parse("auth"),
            client_id: "acme.example".into(),
            user_id: "1".into(),
            code_challenge: None,
            code_challenge_method: None,
        };
        assert!(code.is_expired(now));
        assert!(!code.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_expires_after_saturates() {
        let now = now();
        assert_eq!(expires_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            expires_after(now, Duration::from_secs(600)),
            now + chrono::Duration::seconds(600)
        );
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = ClientCredentials::new("acme.example", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
