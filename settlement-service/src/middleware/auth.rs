//! Actor context extraction.
//!
//! The gateway terminates real authentication and forwards the verified
//! identity on trusted headers. Every domain handler pulls the caller's
//! identity and role through this extractor; visibility scoping is then
//! decided before any store query is built.

use crate::models::{Role, Scope};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Verified caller identity, as asserted by the gateway.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor_id: String,
    pub role: Role,
}

impl AuthContext {
    pub fn new(actor_id: impl Into<String>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }

    /// Visibility scope for store queries: partners see their own records,
    /// admin and finance see everything.
    pub fn scope(&self) -> Scope {
        if self.role.sees_all() {
            Scope::All
        } else {
            Scope::Partner(self.actor_id.clone())
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor_id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing x-actor-id header (required from gateway)"
                ))
            })?;

        let raw_role = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing x-actor-role header (required from gateway)"
                ))
            })?;

        let role = Role::parse(raw_role)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unknown role: {}", raw_role)))?;

        // Add to the request span for observability
        let span = tracing::Span::current();
        span.record("actor_id", actor_id);
        span.record("role", raw_role);

        Ok(AuthContext::new(actor_id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partner_scope_is_restricted_to_self() {
        let auth = AuthContext::new("partner-1", Role::Partner);
        assert_eq!(auth.scope(), Scope::Partner("partner-1".to_string()));
    }

    #[test]
    fn back_office_roles_see_everything() {
        assert_eq!(AuthContext::new("a", Role::Admin).scope(), Scope::All);
        assert_eq!(AuthContext::new("f", Role::Finance).scope(), Scope::All);
    }
}
