//! RS256 session tokens verified against a remote JWKS.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use reqwest::Client;
use serde::Deserialize;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Authenticator, Identity};
use crate::{
    entitlement::UserId,
    error::{GateError, Result},
    http::create_http_client,
};

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
}

/// Default lifetime of the cached key set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

struct CachedKeys {
    set: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Verifies session tokens with keys from a JWKS endpoint.
///
/// Keys are cached for a TTL. A token whose `kid` is not in a fresh cache
/// triggers exactly one refetch, which covers key rotation.
pub struct JwksAuthenticator {
    client: Client,
    jwks_url: Url,
    cache_ttl: Duration,
    keys: RwLock<Option<CachedKeys>>,
    validation: Validation,
}

impl JwksAuthenticator {
    /// Creates an authenticator for a JWKS URL.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] for an invalid URL.
    pub fn new(jwks_url: &str, timeout: Duration) -> Result<Self> {
        let jwks_url = Url::parse(jwks_url)
            .map_err(|e| GateError::Config(format!("invalid JWKS URL '{jwks_url}': {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.validate_aud = false;

        Ok(Self {
            client: create_http_client(timeout)?,
            jwks_url,
            cache_ttl: DEFAULT_CACHE_TTL,
            keys: RwLock::new(None),
            validation,
        })
    }

    /// Overrides how long fetched keys are trusted.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn fetch_keys(&self) -> Result<Arc<JwkSet>> {
        let fetched = async {
            self.client.get(self.jwks_url.clone()).send().await?.error_for_status()?.json::<JwkSet>().await
        }
        .await
        .map_err(|e| {
            warn!(error = %e, "JWKS fetch failed");
            GateError::AuthUnavailable(format!("cannot fetch signing keys: {e}"))
        })?;

        let keys = Arc::new(fetched);
        debug!(count = keys.keys.len(), "JWKS refreshed");
        *self.keys.write().await =
            Some(CachedKeys { set: Arc::clone(&keys), fetched_at: Instant::now() });
        Ok(keys)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        let cached = self
            .keys
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.cache_ttl)
            .map(|cached| Arc::clone(&cached.set));
        let keys = match cached {
            Some(keys) if keys.find(kid).is_some() => keys,
            _ => self.fetch_keys().await?,
        };

        let jwk = keys
            .find(kid)
            .ok_or_else(|| GateError::AuthenticationFailed(format!("unknown signing key '{kid}'")))?;
        DecodingKey::from_jwk(jwk)
            .map_err(|e| GateError::AuthenticationFailed(format!("unusable signing key '{kid}': {e}")))
    }
}

impl std::fmt::Debug for JwksAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksAuthenticator").field("jwks_url", &self.jwks_url.as_str()).finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for JwksAuthenticator {
    #[instrument(skip_all, level = "debug")]
    async fn authenticate(&self, token: &str) -> Result<Identity> {
        let header = decode_header(token)
            .map_err(|e| GateError::AuthenticationFailed(format!("malformed token: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(GateError::AuthenticationFailed(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| GateError::AuthenticationFailed("token has no key id".into()))?;

        let key = self.decoding_key(&kid).await?;
        let data = decode::<SessionClaims>(token, &key, &self.validation)
            .map_err(|e| GateError::AuthenticationFailed(format!("invalid token: {e}")))?;

        if data.claims.sub.is_empty() {
            return Err(GateError::AuthenticationFailed("token has an empty subject".into()));
        }
        Ok(Identity::new(UserId::new(data.claims.sub)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            JwksAuthenticator::new("not a url", Duration::from_secs(5)),
            Err(GateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_token_fails_before_fetch() {
        let auth = JwksAuthenticator::new("http://127.0.0.1:9/jwks.json", Duration::from_secs(1)).unwrap();
        let err = auth.authenticate("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, GateError::AuthenticationFailed(_)));
    }
}
