//! Scope Authorizer: decides whether a user may grant a client a scope

use crate::error::OAuthError;
use crate::model::{Client, Principal, Role, Scope};
use log::debug;
use std::collections::HashMap;

pub const DEFAULT_SCOPE: &str = "auth";

/// Tenant membership check plus a per-role ceiling on grantable scope.
///
/// A user may authorize a client when they belong to the client's tenant or
/// hold the admin role. The granted scope is the requested scope narrowed to
/// what the user's role may grant; an empty request asks for the default.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    default_scope: Scope,
    role_scopes: HashMap<Role, Scope>,
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self::new(Scope::parse(DEFAULT_SCOPE))
    }
}

impl ScopePolicy {
    /// Every role may grant exactly `default_scope`
    pub fn new(default_scope: Scope) -> Self {
        let role_scopes = [Role::Admin, Role::Editor, Role::Viewer]
            .into_iter()
            .map(|role| (role, default_scope.clone()))
            .collect();
        Self {
            default_scope,
            role_scopes,
        }
    }

    pub fn with_role_scope(mut self, role: Role, scope: Scope) -> Self {
        self.role_scopes.insert(role, scope);
        self
    }

    pub fn default_scope(&self) -> &Scope {
        &self.default_scope
    }

    pub fn grantable(&self, role: Role) -> Scope {
        self.role_scopes.get(&role).cloned().unwrap_or_default()
    }

    /// Decides the scope granted at the authorization endpoint
    pub fn authorize(
        &self,
        user: &Principal,
        client: &Client,
        requested: &Scope,
    ) -> Result<Scope, OAuthError> {
        if !user.belongs_to(client) && !user.is_admin() {
            debug!(
                "User {} (instance {:?}) may not authorize client {}",
                user.id, user.instance_id, client.id
            );
            return Err(OAuthError::AccessDenied(
                "user is not a member of this instance".to_string(),
            ));
        }

        let requested = if requested.is_empty() {
            &self.default_scope
        } else {
            requested
        };
        let granted = requested.intersection(&self.grantable(user.role));
        if granted.is_empty() {
            return Err(OAuthError::AccessDenied(format!(
                "role {} may not grant scope '{}'",
                user.role, requested
            )));
        }
        Ok(granted)
    }

    /// Re-evaluates a previously granted scope at token issuance, so that a
    /// user removed from the tenant or demoted in between is refused.
    pub fn reauthorize(
        &self,
        user: &Principal,
        client: &Client,
        carried: &Scope,
    ) -> Result<Scope, OAuthError> {
        self.authorize(user, client, carried).map_err(|err| match err {
            OAuthError::AccessDenied(reason) => {
                OAuthError::InvalidGrant(format!("grant is no longer authorized: {}", reason))
            }
            other => other,
        })
    }
}
