//! Identity Provider Binding (spec.md §4.2, component C2).
//!
//! `IdentityProvider` is the capability set spec.md describes, modeled as a
//! trait with two variants (`google`, `okta`) rather than an inheritance
//! hierarchy, per spec.md §9's design note. `SingleFlightProvider` wraps any
//! variant uniformly so refresh/validate/group calls coalesce across
//! concurrent requests for the same underlying argument.

pub mod google;
pub mod okta;
pub mod singleflight;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SsoError;
use singleflight::SingleFlight;

/// Tokens returned by a successful redeem or refresh.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<Duration>,
}

/// Minimal identity resolved from a token (spec.md's `{email,user}`).
#[derive(Debug, Clone)]
pub struct Profile {
    pub email: String,
    pub user: String,
}

/// A ready-to-redirect authorization request: the URL to send the browser
/// to, plus the CSRF token and PKCE verifier the caller must stash
/// (typically in short-lived cookies) to validate the callback.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub auth_url: url::Url,
    pub csrf_token: String,
    pub pkce_verifier: String,
}

/// The capability set spec.md §4.2 describes. Implemented once per
/// provider (`GoogleProvider`, `OktaProvider`); every call is expected by
/// callers to be wrapped in `SingleFlightProvider` before use in a shared
/// service, and to be invoked under `tokio::time::timeout`.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn build_authorize_url(&self) -> AuthorizeRequest;

    async fn redeem(&self, code: &str, pkce_verifier: &str) -> Result<(TokenSet, Profile), SsoError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, SsoError>;

    async fn revoke(&self, access_token: &str) -> Result<(), SsoError>;

    async fn validate_token(&self, access_token: &str) -> Result<bool, SsoError>;

    async fn get_user_profile(&self, access_token: &str) -> Result<Profile, SsoError>;

    /// `access_token` is required by providers (Okta) whose group claim is
    /// bound to the caller's own token rather than addressable by email
    /// alone; providers that enumerate groups out-of-band (Google) ignore
    /// it and rely on `crate::groupcache`'s fill-mode snapshot instead.
    async fn get_groups(&self, email: &str, access_token: Option<&str>) -> Result<Vec<String>, SsoError>;

    /// Whether this provider supports group enumeration (selects
    /// fill-mode vs on-demand group caching, spec.md §4.3).
    fn supports_group_enumeration(&self) -> bool;
}

/// Wraps any `IdentityProvider` so that concurrent identical calls (same
/// method, same logical argument) coalesce into one upstream request
/// (spec.md §4.2, §8).
pub struct SingleFlightProvider {
    inner: Arc<dyn IdentityProvider>,
    refresh_flight: SingleFlight<TokenSet, String>,
    validate_flight: SingleFlight<bool, String>,
    groups_flight: SingleFlight<Vec<String>, String>,
    request_timeout: Duration,
}

impl SingleFlightProvider {
    pub fn new(inner: Arc<dyn IdentityProvider>, request_timeout: Duration) -> Self {
        Self {
            inner,
            refresh_flight: SingleFlight::new(),
            validate_flight: SingleFlight::new(),
            groups_flight: SingleFlight::new(),
            request_timeout,
        }
    }

    pub fn build_authorize_url(&self) -> AuthorizeRequest {
        self.inner.build_authorize_url()
    }

    pub async fn redeem(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<(TokenSet, Profile), SsoError> {
        // Authorization codes are single-use by construction, so redeem is
        // not single-flighted: coalescing it would make the second waiter
        // receive a stale/duplicate grant instead of its own attempt.
        with_timeout(self.request_timeout, self.inner.redeem(code, pkce_verifier)).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, SsoError> {
        let key = format!("refresh:{}", fingerprint(refresh_token));
        let inner = self.inner.clone();
        let timeout = self.request_timeout;
        let refresh_token = refresh_token.to_string();
        self.refresh_flight
            .run(&key, async move {
                with_timeout(timeout, inner.refresh(&refresh_token))
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(SsoError::ProviderTransient)
    }

    pub async fn revoke(&self, access_token: &str) -> Result<(), SsoError> {
        with_timeout(self.request_timeout, self.inner.revoke(access_token)).await
    }

    pub async fn validate_token(&self, access_token: &str) -> Result<bool, SsoError> {
        let key = format!("validate:{}", fingerprint(access_token));
        let inner = self.inner.clone();
        let timeout = self.request_timeout;
        let access_token = access_token.to_string();
        self.validate_flight
            .run(&key, async move {
                with_timeout(timeout, inner.validate_token(&access_token))
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(SsoError::ProviderTransient)
    }

    pub async fn get_user_profile(&self, access_token: &str) -> Result<Profile, SsoError> {
        with_timeout(self.request_timeout, self.inner.get_user_profile(access_token)).await
    }

    pub async fn get_groups(
        &self,
        email: &str,
        access_token: Option<&str>,
    ) -> Result<Vec<String>, SsoError> {
        let key = match access_token {
            Some(token) => format!("groups:{email}:{}", fingerprint(token)),
            None => format!("groups:{email}"),
        };
        let inner = self.inner.clone();
        let timeout = self.request_timeout;
        let email = email.to_string();
        let access_token = access_token.map(|t| t.to_string());
        self.groups_flight
            .run(&key, async move {
                with_timeout(timeout, inner.get_groups(&email, access_token.as_deref()))
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(SsoError::ProviderTransient)
    }

    pub fn supports_group_enumeration(&self) -> bool {
        self.inner.supports_group_enumeration()
    }
}

async fn with_timeout<T>(
    d: Duration,
    fut: impl std::future::Future<Output = Result<T, SsoError>>,
) -> Result<T, SsoError> {
    match tokio::time::timeout(d, fut).await {
        Ok(result) => result,
        Err(_) => Err(SsoError::ProviderTransient("request timed out".to_string())),
    }
}

/// Cheap, non-reversible fingerprint used only to build single-flight keys
/// so raw tokens never sit in a shared map as plaintext.
fn fingerprint(secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        refresh_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        fn build_authorize_url(&self) -> AuthorizeRequest {
            unimplemented!()
        }

        async fn redeem(&self, _code: &str, _v: &str) -> Result<(TokenSet, Profile), SsoError> {
            unimplemented!()
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, SsoError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(TokenSet {
                access_token: "new-at".to_string(),
                refresh_token: None,
                id_token: None,
                expires_in: None,
            })
        }

        async fn revoke(&self, _access_token: &str) -> Result<(), SsoError> {
            Ok(())
        }

        async fn validate_token(&self, _access_token: &str) -> Result<bool, SsoError> {
            Ok(true)
        }

        async fn get_user_profile(&self, _access_token: &str) -> Result<Profile, SsoError> {
            unimplemented!()
        }

        async fn get_groups(&self, _email: &str, _access_token: Option<&str>) -> Result<Vec<String>, SsoError> {
            Ok(vec![])
        }

        fn supports_group_enumeration(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn refresh_calls_for_same_token_coalesce() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(SingleFlightProvider::new(
            Arc::new(CountingProvider {
                refresh_calls: calls.clone(),
            }),
            Duration::from_secs(2),
        ));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                provider.refresh("same-refresh-token").await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
