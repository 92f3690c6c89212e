//! Caller authentication.
//!
//! Requests carry an identity-provider session token as
//! `Authorization: Bearer <jwt>`. The token only establishes *who* the
//! caller is; role and plan come from the stored entitlement record.
//!
//! Provisioning of entitlement records is driven by signed webhooks, see
//! [`webhook`].

mod jwks;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use jwks::{DEFAULT_CACHE_TTL, JwksAuthenticator};
use crate::{
    entitlement::UserId,
    error::{GateError, Result},
};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity-provider subject.
    pub user_id: UserId,
}

impl Identity {
    /// Wraps a user id.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// Verifies bearer tokens.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validates a raw token (without the `Bearer ` prefix).
    ///
    /// # Errors
    ///
    /// Returns [`GateError::AuthenticationFailed`] for invalid tokens and
    /// [`GateError::AuthUnavailable`] when keys cannot be obtained.
    async fn authenticate(&self, token: &str) -> Result<Identity>;
}

/// Extracts the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively.
///
/// # Errors
///
/// Returns [`GateError::AuthenticationFailed`] if the header is missing,
/// uses another scheme, or carries an empty token.
pub fn parse_bearer(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or_else(|| GateError::AuthenticationFailed("missing Authorization header".into()))?;
    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| GateError::AuthenticationFailed("malformed Authorization header".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GateError::AuthenticationFailed("expected Bearer authorization".into()));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(GateError::AuthenticationFailed("empty bearer token".into()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(parse_bearer(Some("bearer  abc ")).unwrap(), "abc");
    }

    #[test]
    fn test_parse_bearer_rejects() {
        for header in [None, Some("Bearer"), Some("Bearer   "), Some("Basic dXNlcjpwYXNz"), Some("abc")] {
            assert!(
                matches!(parse_bearer(header), Err(GateError::AuthenticationFailed(_))),
                "{header:?}"
            );
        }
    }
}
