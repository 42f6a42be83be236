//! Explicit, struct-based configuration.
//!
//! Deliberately not a reflection-driven options struct: every environment
//! variable is bound to a named field in one place (`Config::from_env`), and
//! the whole thing is validated once before either binary starts listening.

use std::collections::HashMap;
use std::time::Duration;

use figment::Figment;
use figment::providers::Env;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::error::SsoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Okta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    pub log_level: String,

    pub cookie_secret: String,
    pub cookie_secret_old: Option<String>,
    pub cookie_name: String,
    pub auth_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub insecure_cookie: bool,

    pub client_id: String,
    pub client_secret: String,
    pub provider: ProviderKind,
    pub okta_authorization_server_id: Option<String>,
    pub okta_org_url: Option<String>,
    pub google_admin_impersonate_email: Option<String>,
    pub google_admin_access_token: Option<String>,

    pub proxy_client_id: String,
    pub proxy_client_secret: String,
    pub proxy_root_domain: String,
    pub auth_code_secret: String,
    pub skip_provider_button: bool,

    pub email_domain: Option<String>,
    pub email_addresses: Option<String>,

    pub oauth_callback_url: String,
    pub authenticator_url: String,

    pub cookie_expire_secs: u64,
    pub cookie_refresh_secs: u64,
    pub session_lifetime_secs: u64,
    pub valid_window_secs: u64,
    pub grace_period_secs: u64,

    pub request_timeout_secs: u64,
    pub tcp_read_timeout_secs: u64,
    pub tcp_write_timeout_secs: u64,

    pub groups_cache_ttl_secs: u64,
    pub groups_cache_refresh_ttl_secs: u64,

    pub statsd_host: Option<String>,
    pub statsd_port: Option<u16>,

    pub upstreams_config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4180".to_string(),
            log_level: "info".to_string(),
            cookie_secret: String::new(),
            cookie_secret_old: None,
            cookie_name: "_sso_proxy".to_string(),
            auth_cookie_name: "_sso_auth".to_string(),
            cookie_domain: None,
            insecure_cookie: false,
            client_id: String::new(),
            client_secret: String::new(),
            provider: ProviderKind::Google,
            okta_authorization_server_id: None,
            okta_org_url: None,
            google_admin_impersonate_email: None,
            google_admin_access_token: None,
            proxy_client_id: String::new(),
            proxy_client_secret: String::new(),
            proxy_root_domain: String::new(),
            auth_code_secret: String::new(),
            skip_provider_button: false,
            email_domain: None,
            email_addresses: None,
            oauth_callback_url: String::new(),
            authenticator_url: "http://127.0.0.1:4180".to_string(),
            cookie_expire_secs: 168 * 3600,
            cookie_refresh_secs: 3600,
            session_lifetime_secs: 720 * 3600,
            valid_window_secs: 60,
            grace_period_secs: 4 * 3600,
            request_timeout_secs: 2,
            tcp_read_timeout_secs: 30,
            tcp_write_timeout_secs: 30,
            groups_cache_ttl_secs: 600,
            groups_cache_refresh_ttl_secs: 600,
            statsd_host: None,
            statsd_port: None,
            upstreams_config: None,
        }
    }
}

impl Config {
    /// Bind environment variables onto the default struct. Each field is
    /// named explicitly by `Env::prefixed`/field rename below rather than
    /// discovered via reflection over the struct's shape.
    pub fn from_env() -> Result<Self, SsoError> {
        let figment = Figment::from(figment::providers::Serialized::defaults(Config::default()))
            .merge(Env::raw().map(|k| k.as_str().to_lowercase().into()));
        let cfg: Config = figment
            .extract()
            .map_err(|e| SsoError::Config(format!("failed to load configuration: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), SsoError> {
        if self.cookie_secret.is_empty() {
            return Err(SsoError::Config("COOKIE_SECRET is required".to_string()));
        }
        let decoded = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &self.cookie_secret,
        )
        .map_err(|e| SsoError::Config(format!("COOKIE_SECRET is not valid base64: {e}")))?;
        if decoded.len() != 32 && decoded.len() != 64 {
            return Err(SsoError::Config(format!(
                "COOKIE_SECRET must decode to 32 or 64 bytes, got {}",
                decoded.len()
            )));
        }
        if self.cookie_refresh_secs >= self.cookie_expire_secs {
            return Err(SsoError::Config(
                "COOKIE_REFRESH must be strictly less than COOKIE_EXPIRE".to_string(),
            ));
        }
        if self.email_domain.is_none() && self.email_addresses.is_none() {
            return Err(SsoError::Config(
                "one of EMAIL_DOMAIN or EMAIL_ADDRESSES must be set".to_string(),
            ));
        }
        if self.proxy_client_id.is_empty() || self.proxy_client_secret.is_empty() {
            return Err(SsoError::Config(
                "PROXY_CLIENT_ID and PROXY_CLIENT_SECRET are required".to_string(),
            ));
        }
        if self.auth_code_secret.is_empty() {
            return Err(SsoError::Config("AUTH_CODE_SECRET is required".to_string()));
        }
        Url::parse(&self.oauth_callback_url)
            .map_err(|e| SsoError::Config(format!("OAUTH_CALLBACK_URL is invalid: {e}")))?;
        if self.provider == ProviderKind::Okta && self.okta_org_url.is_none() {
            return Err(SsoError::Config(
                "OKTA_ORG_URL is required when PROVIDER=okta".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tcp_read_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_read_timeout_secs)
    }

    pub fn tcp_write_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_write_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Email validator configuration, resolved from `Config`. Addresses take
/// precedence over domains when both are configured (spec.md §4.5).
#[derive(Debug, Clone)]
pub enum EmailValidator {
    Domain(Vec<String>),
    Address(Vec<String>),
}

impl EmailValidator {
    pub fn from_config(cfg: &Config) -> Self {
        if let Some(addrs) = &cfg.email_addresses {
            return EmailValidator::Address(split_csv(addrs));
        }
        EmailValidator::Domain(split_csv(cfg.email_domain.as_deref().unwrap_or("*")))
    }

    pub fn is_valid(&self, email: &str) -> bool {
        let email = email.to_ascii_lowercase();
        match self {
            EmailValidator::Domain(domains) => {
                if domains.iter().any(|d| d == "*") {
                    return true;
                }
                let Some((_, domain)) = email.split_once('@') else {
                    return false;
                };
                domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
            }
            EmailValidator::Address(addresses) => {
                if addresses.iter().any(|a| a == "*") {
                    return true;
                }
                addresses.iter().any(|a| a.eq_ignore_ascii_case(&email))
            }
        }
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// A single upstream route entry (spec.md §3 `UpstreamConfig`), created at
/// startup from a TOML routing file and immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub from_host: String,
    #[serde(default)]
    pub from_host_is_regex: bool,
    pub to_url: String,
    #[serde(default)]
    pub route_kind: RouteKind,
    #[serde(default)]
    pub options: UpstreamOptions,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    #[default]
    Simple,
    Rewrite,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamOptions {
    #[serde(default)]
    pub skip_auth_regex: Vec<String>,
    #[serde(default)]
    pub skip_request_signing: bool,
    #[serde(default)]
    pub allowed_email_domains: Vec<String>,
    #[serde(default)]
    pub allowed_email_addresses: Vec<String>,
    #[serde(default)]
    pub allowed_groups: Vec<String>,
    #[serde(default)]
    pub pass_host_header: bool,
    #[serde(default)]
    pub pass_user_headers: bool,
    #[serde(default)]
    pub set_xauth_request_headers: bool,
    #[serde(default)]
    pub inject_request_headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
    pub cookie_name_override: Option<String>,
}

/// Top-level list of upstreams loaded from a TOML file at startup.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamsFile {
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

impl UpstreamsFile {
    pub fn load(path: &str) -> Result<Self, SsoError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SsoError::Config(format!("failed to read {path}: {e}")))?;
        toml_like::parse(&contents)
            .map_err(|e| SsoError::Config(format!("failed to parse {path}: {e}")))
    }
}

/// Minimal TOML-ish loader kept dependency-free: the routing file format is
/// simple enough (flat table arrays) that we delegate to `serde_json` after
/// a byte-for-byte reinterpretation would be overkill here, so instead this
/// crate expects the routing file to already be JSON (see `UpstreamsFile`
/// doc on the proxy binary's `--upstreams` flag).
mod toml_like {
    use super::UpstreamsFile;

    pub fn parse(contents: &str) -> Result<UpstreamsFile, serde_json::Error> {
        serde_json::from_str(contents)
    }
}

/// Compiled regex for a skip-auth rule, cached at router construction time.
pub fn compile_skip_auth(patterns: &[String]) -> Result<Vec<Regex>, SsoError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| SsoError::Config(format!("invalid regex {p}: {e}"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_domain_wildcard_accepts_any_shaped_email() {
        let v = EmailValidator::Domain(vec!["*".to_string()]);
        assert!(v.is_valid("anyone@example.com"));
    }

    #[test]
    fn email_domain_matches_case_insensitively() {
        let v = EmailValidator::Domain(vec!["Corp.com".to_string()]);
        assert!(v.is_valid("a@CORP.COM"));
        assert!(!v.is_valid("a@other.com"));
    }

    #[test]
    fn email_addresses_take_precedence_over_domain() {
        let cfg = Config {
            email_domain: Some("corp.com".to_string()),
            email_addresses: Some("only@corp.com".to_string()),
            ..Config::default()
        };
        let v = EmailValidator::from_config(&cfg);
        assert!(v.is_valid("only@corp.com"));
        assert!(!v.is_valid("other@corp.com"));
    }

    #[test]
    fn cookie_refresh_must_be_less_than_expire() {
        let mut cfg = Config {
            cookie_secret: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                [0u8; 32],
            ),
            email_domain: Some("*".to_string()),
            proxy_client_id: "p".to_string(),
            proxy_client_secret: "s".to_string(),
            auth_code_secret: "x".to_string(),
            oauth_callback_url: "https://auth.example.com/callback".to_string(),
            ..Config::default()
        };
        cfg.cookie_refresh_secs = cfg.cookie_expire_secs;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cookie_secret_wrong_length_fails_validation() {
        let cfg = Config {
            cookie_secret: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                [0u8; 33],
            ),
            email_domain: Some("*".to_string()),
            proxy_client_id: "p".to_string(),
            proxy_client_secret: "s".to_string(),
            auth_code_secret: "x".to_string(),
            oauth_callback_url: "https://auth.example.com/callback".to_string(),
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, SsoError::Config(_)));
    }
}
