//! Caller identity as resolved by the upstream authentication layer.
//!
//! Session handling and password checks live in a separate service; by the
//! time a request reaches this backend the caller's id and role arrive as
//! trusted headers. Absent headers mean an anonymous caller.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::models::Role;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user_id: Option<String>,
    pub role: Option<Role>,
}

impl Identity {
    /// The caller's id and role, or 401 when either is missing.
    pub fn authenticated(&self) -> Result<(&str, Role), AppError> {
        match (self.user_id.as_deref(), self.role) {
            (Some(id), Some(role)) => Ok((id, role)),
            _ => Err(AppError::Unauthorized),
        }
    }

    /// Authenticated caller with one of the allowed roles; a known caller
    /// with the wrong role gets 403, not 401.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(&str, Role), AppError> {
        let (id, role) = self.authenticated()?;
        if allowed.contains(&role) {
            Ok((id, role))
        } else {
            Err(AppError::Forbidden)
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse);
        Ok(Identity { user_id, role })
    }
}
