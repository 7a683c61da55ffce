//! Bearer token cache for challenge-driven OAuth2 exchange (spec.md §4.5).
//!
//! Grounded on monocore's `DockerAuthMaterial`/`get_auth_material`
//! (`oci/distribution/docker.rs`) — realm/service/scope query shape and the
//! "re-authenticate once expired" policy — generalized from a single
//! hardcoded Docker Hub realm to whatever realm the upstream's own
//! `Www-Authenticate` challenge names, and cached instead of fetched fresh
//! on every call.

use std::{collections::HashMap, sync::Mutex, time::{Duration, Instant}};

use serde::Deserialize;

use crate::model::UpstreamConfigId;

const MAX_TOKEN_TTL: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Process-wide, keyed by `(upstreamID, scope)` (spec.md §4.5, §5 "Shared
/// resources").
#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<(UpstreamConfigId, String), CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, upstream_id: UpstreamConfigId, scope: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        let cached = entries.get(&(upstream_id, scope.to_owned()))?;
        if cached.expires_at > Instant::now() {
            Some(cached.token.clone())
        } else {
            None
        }
    }

    fn store(&self, upstream_id: UpstreamConfigId, scope: &str, token: String, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            (upstream_id, scope.to_owned()),
            CachedToken {
                token,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Performs the OAuth2 token exchange against `realm` and caches the
    /// result, capped at `min(expires_in, 300s)`.
    pub async fn exchange(
        &self,
        client: &reqwest_middleware::ClientWithMiddleware,
        upstream_id: UpstreamConfigId,
        realm: &str,
        service: Option<&str>,
        scope: Option<&str>,
        basic_auth: Option<(&str, &str)>,
    ) -> Result<String, super::Error> {
        if let Some(scope) = scope {
            if let Some(cached) = self.get(upstream_id, scope) {
                return Ok(cached);
            }
        }

        let mut request = client.get(realm);
        let mut query = Vec::new();
        if let Some(service) = service {
            query.push(("service", service));
        }
        if let Some(scope) = scope {
            query.push(("scope", scope));
        }
        request = request.query(&query);
        if let Some((user, pass)) = basic_auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| super::Error::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(super::Error::TokenExchangeFailed(response.status().as_u16()));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| super::Error::Transport(e.to_string()))?;
        let ttl = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(MAX_TOKEN_TTL)
            .min(MAX_TOKEN_TTL);

        if let Some(scope) = scope {
            self.store(upstream_id, scope, parsed.token.clone(), ttl);
        }

        Ok(parsed.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_misses_on_empty_cache() {
        let cache = TokenCache::new();
        assert!(cache.get(uuid::Uuid::new_v4(), "repository:x:pull").is_none());
    }

    #[test]
    fn stored_token_is_retrievable_until_expiry() {
        let cache = TokenCache::new();
        let id = uuid::Uuid::new_v4();
        cache.store(id, "scope", "tok123".to_owned(), Duration::from_secs(60));
        assert_eq!(cache.get(id, "scope").as_deref(), Some("tok123"));
    }

    #[test]
    fn expired_token_is_not_returned() {
        let cache = TokenCache::new();
        let id = uuid::Uuid::new_v4();
        cache.store(id, "scope", "tok123".to_owned(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(id, "scope").is_none());
    }
}
