use std::sync::Arc;

use axum::http::HeaderMap;
use base64::Engine;
use subtle::ConstantTimeEq;

use crate::config::{Config, EmailValidator};
use crate::error::SsoError;
use crate::groupcache::GroupCache;
use crate::metrics::Metrics;
use crate::provider::SingleFlightProvider;

#[derive(Clone)]
pub struct AuthenticatorState {
    pub cfg: Arc<Config>,
    pub provider: Arc<SingleFlightProvider>,
    pub email_validator: Arc<EmailValidator>,
    /// Shared with the proxy's fill-mode cache when the provider supports
    /// group enumeration, so `/profile` (spec.md §4.5) can answer against
    /// real membership instead of an empty/error fallback.
    pub group_cache: Option<Arc<GroupCache>>,
    pub metrics: Metrics,
}

impl AuthenticatorState {
    /// Verifies the `Authorization: Basic` header against
    /// `ProxyClientId`/`ProxyClientSecret`, in constant time.
    pub fn verify_proxy_basic_auth(&self, headers: &HeaderMap) -> Result<(), SsoError> {
        let expected = format!("{}:{}", self.cfg.proxy_client_id, self.cfg.proxy_client_secret);
        let expected_b64 = base64::engine::general_purpose::STANDARD.encode(expected);

        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SsoError::AuthForbidden("missing Authorization header".to_string()))?;

        let provided_b64 = header
            .strip_prefix("Basic ")
            .ok_or_else(|| SsoError::AuthForbidden("expected Basic auth".to_string()))?;

        if provided_b64.len() != expected_b64.len()
            || !bool::from(provided_b64.as_bytes().ct_eq(expected_b64.as_bytes()))
        {
            return Err(SsoError::AuthForbidden("invalid proxy credentials".to_string()));
        }
        Ok(())
    }
}
