//! Request-scoped authorization context
//!
//! One `AuthorizationContext` is built per request from a
//! [`ValidationResult`] and handed to resolvers and RBAC guards. It is the
//! only place identity fields are normalized, so JWT and introspection
//! callers see the same shape.

use crate::resolver::{ValidationResult, ValidationSource};

/// Identity and grants of the caller behind one request
#[derive(Debug, Clone, Default)]
pub struct AuthorizationContext {
    /// Whether the bearer token was accepted
    pub authenticated: bool,
    /// Subject identifier (user id or client id)
    pub subject: String,
    /// Email address, from JWT custom claims
    pub email: Option<String>,
    /// Display name, from JWT custom claims
    pub name: Option<String>,
    /// Username, from introspection
    pub username: Option<String>,
    /// Role labels as granted (not expanded through the hierarchy)
    pub roles: Vec<String>,
    /// Authority labels as granted
    pub authorities: Vec<String>,
    /// OAuth scopes
    pub scopes: Vec<String>,
    /// Organization id
    pub organization_id: Option<String>,
    /// Department id
    pub department_id: Option<String>,
    /// Tenant id
    pub tenant_id: Option<String>,
    /// OAuth client the token was issued to
    pub client_id: Option<String>,
    /// Strategy that authenticated the request
    pub via: Option<ValidationSource>,
    /// The full validation outcome
    pub validation: Option<ValidationResult>,
}

impl AuthorizationContext {
    /// Context for a request without (valid) credentials
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Start building a context by hand
    pub fn builder() -> AuthorizationContextBuilder {
        AuthorizationContextBuilder::default()
    }

    /// Normalize a validation outcome into a context
    pub fn from_validation(result: &ValidationResult) -> Self {
        let mut context = Self {
            authenticated: result.valid,
            via: Some(result.via),
            validation: Some(result.clone()),
            ..Self::default()
        };

        match result.via {
            ValidationSource::Jwt => {
                if let Some(claims) = &result.claims {
                    context.subject = claims.subject.clone();
                    context.email = claims.custom_str("email").map(str::to_string);
                    context.name = claims.custom_str("name").map(str::to_string);
                    context.roles = claims.roles.clone();
                    context.authorities = claims.authorities.clone();
                    context.scopes = claims.scopes.clone();
                    context.organization_id = claims.organization_id.clone();
                    context.department_id = claims.department_id.clone();
                    context.tenant_id = claims.tenant_id.clone();
                }
            }
            ValidationSource::Introspection => {
                if let Some(introspection) = &result.introspection {
                    context.subject = introspection.sub.clone().unwrap_or_default();
                    context.username = introspection.username.clone();
                    context.roles = introspection.roles.clone();
                    context.authorities = introspection.authorities.clone();
                    context.client_id = introspection.client_id.clone();
                    context.scopes = introspection.scopes();
                }
            }
        }

        context
    }

    /// Holds `role` exactly (no hierarchy; see [`crate::rbac::RbacEngine`])
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Holds at least one of `roles`
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    /// Holds `authority` exactly
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }

    /// Holds at least one of `authorities`
    pub fn has_any_authority(&self, authorities: &[&str]) -> bool {
        authorities.iter().any(|authority| self.has_authority(authority))
    }

    /// Token carries `scope`
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Machine caller: holds `SERVICE` or acts as its own client
    pub fn is_service_account(&self) -> bool {
        self.has_authority("SERVICE")
            || self
                .client_id
                .as_deref()
                .is_some_and(|client_id| !self.subject.is_empty() && client_id == self.subject)
    }
}

/// Builder for [`AuthorizationContext`]
#[derive(Debug, Default)]
pub struct AuthorizationContextBuilder {
    context: AuthorizationContext,
}

impl AuthorizationContextBuilder {
    /// Set the subject and mark the context authenticated
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.context.subject = subject.into();
        self.context.authenticated = true;
        self
    }

    /// Override the authenticated flag
    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.context.authenticated = authenticated;
        self
    }

    /// Add a role
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.context.roles.push(role.into());
        self
    }

    /// Add an authority
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.context.authorities.push(authority.into());
        self
    }

    /// Add a scope
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.context.scopes.push(scope.into());
        self
    }

    /// Set the client id
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.context.client_id = Some(client_id.into());
        self
    }

    /// Set the organization id
    pub fn organization_id(mut self, organization_id: impl Into<String>) -> Self {
        self.context.organization_id = Some(organization_id.into());
        self
    }

    /// Set the tenant id
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.context.tenant_id = Some(tenant_id.into());
        self
    }

    /// Finish
    pub fn build(self) -> AuthorizationContext {
        self.context
    }
}

/// Token from an `Authorization: Bearer <token>` header value
///
/// The scheme is matched case-insensitively; an empty token yields `None`.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::TokenIntrospection;
    use crate::jwt::Claims;
    use serde_json::json;

    fn jwt_result() -> ValidationResult {
        let mut claims = Claims::for_subject("42");
        claims.roles = vec!["MANAGER".into()];
        claims.authorities = vec!["WRITE_ACCESS".into()];
        claims.scopes = vec!["erp.read".into()];
        claims.organization_id = Some("org-1".into());
        claims.department_id = Some("dep-2".into());
        claims.tenant_id = Some("t-3".into());
        claims
            .custom_claims
            .insert("email".into(), json!("ada@example.com"));
        claims.custom_claims.insert("name".into(), json!("Ada"));

        ValidationResult {
            valid: true,
            token: "t".into(),
            via: ValidationSource::Jwt,
            claims: Some(claims),
            introspection: None,
        }
    }

    #[test]
    fn test_from_jwt_validation() {
        let context = AuthorizationContext::from_validation(&jwt_result());

        assert!(context.authenticated);
        assert_eq!(context.subject, "42");
        assert_eq!(context.email.as_deref(), Some("ada@example.com"));
        assert_eq!(context.name.as_deref(), Some("Ada"));
        assert_eq!(context.organization_id.as_deref(), Some("org-1"));
        assert_eq!(context.department_id.as_deref(), Some("dep-2"));
        assert_eq!(context.tenant_id.as_deref(), Some("t-3"));
        assert_eq!(context.via, Some(ValidationSource::Jwt));
        assert!(context.has_role("MANAGER"));
        assert!(!context.has_role("ADMIN"));
        assert!(context.has_authority("WRITE_ACCESS"));
        assert!(context.has_scope("erp.read"));
    }

    #[test]
    fn test_from_introspection_validation() {
        let result = ValidationResult {
            valid: true,
            token: "t".into(),
            via: ValidationSource::Introspection,
            claims: None,
            introspection: Some(TokenIntrospection {
                active: true,
                sub: Some("svc-billing".into()),
                client_id: Some("svc-billing".into()),
                username: Some("billing".into()),
                scope: Some("erp.read erp.write".into()),
                roles: vec!["USER".into()],
                ..Default::default()
            }),
        };
        let context = AuthorizationContext::from_validation(&result);

        assert_eq!(context.subject, "svc-billing");
        assert_eq!(context.username.as_deref(), Some("billing"));
        assert_eq!(context.scopes, vec!["erp.read", "erp.write"]);
        assert!(context.has_any_role(&["ADMIN", "USER"]));
        assert!(context.is_service_account());
    }

    #[test]
    fn test_invalid_result_is_unauthenticated() {
        let mut result = jwt_result();
        result.valid = false;
        assert!(!AuthorizationContext::from_validation(&result).authenticated);
    }

    #[test]
    fn test_service_account_by_authority() {
        let context = AuthorizationContext::builder()
            .subject("user-1")
            .authority("SERVICE")
            .build();
        assert!(context.is_service_account());

        let human = AuthorizationContext::builder().subject("user-1").build();
        assert!(!human.is_service_account());
        assert!(!AuthorizationContext::anonymous().is_service_account());
    }

    #[test]
    fn test_any_helpers() {
        let context = AuthorizationContext::builder()
            .subject("u")
            .role("USER")
            .authority("READ_ACCESS")
            .build();
        assert!(context.has_any_role(&["ADMIN", "USER"]));
        assert!(!context.has_any_role(&[]));
        assert!(context.has_any_authority(&["READ_ACCESS"]));
        assert!(!context.has_any_authority(&["WRITE_ACCESS"]));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(extract_bearer_token("bearer  opaque "), Some("opaque"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(extract_bearer_token("abc"), None);
    }
}
