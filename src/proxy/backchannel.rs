//! Back-channel calls from the Proxy to the Authenticator's `/redeem`,
//! `/refresh`, and `/validate` endpoints, authenticated with HTTP Basic
//! using `ProxyClientId`/`ProxyClientSecret`.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::error::SsoError;
use crate::session::SessionState;

fn basic_auth_header(cfg: &Config) -> String {
    let raw = format!("{}:{}", cfg.proxy_client_id, cfg.proxy_client_secret);
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
}

#[derive(Debug, Deserialize)]
struct RedeemResponse {
    email: String,
    user: String,
    groups: Vec<String>,
    access_token: String,
    refresh_token: String,
    id_token: Option<String>,
    lifetime_deadline: DateTime<Utc>,
    refresh_deadline: DateTime<Utc>,
    valid_deadline: DateTime<Utc>,
}

pub async fn redeem(
    http: &reqwest::Client,
    cfg: &Config,
    auth_code: &str,
) -> Result<SessionState, SsoError> {
    let resp = http
        .post(format!("{}/redeem", cfg.authenticator_url))
        .header(axum::http::header::AUTHORIZATION, basic_auth_header(cfg))
        .form(&[("code", auth_code)])
        .timeout(cfg.request_timeout())
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SsoError::ProviderPermanent(format!(
            "redeem rejected with status {}",
            resp.status()
        )));
    }
    let body: RedeemResponse = resp.json().await?;
    Ok(SessionState {
        email: body.email,
        user: body.user,
        groups: body.groups,
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        id_token: body.id_token,
        lifetime_deadline: body.lifetime_deadline,
        refresh_deadline: body.refresh_deadline,
        valid_deadline: body.valid_deadline,
        grace_period_start: None,
    })
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<u64>,
}

pub async fn refresh(
    http: &reqwest::Client,
    cfg: &Config,
    refresh_token: &str,
) -> Result<(String, Option<u64>), SsoError> {
    let resp = http
        .post(format!("{}/refresh", cfg.authenticator_url))
        .header(axum::http::header::AUTHORIZATION, basic_auth_header(cfg))
        .form(&[("refresh_token", refresh_token)])
        .timeout(cfg.request_timeout())
        .send()
        .await?;

    match resp.status() {
        s if s.is_success() => {
            let body: RefreshResponse = resp.json().await?;
            Ok((body.access_token, body.expires_in))
        }
        s if s.as_u16() == 401 => Err(SsoError::ProviderPermanent("refresh token rejected".to_string())),
        s => Err(SsoError::ProviderTransient(format!("refresh failed with status {s}"))),
    }
}

/// Best-effort: the authenticator revokes the token with the provider and
/// the proxy clears its cookie regardless of the outcome (spec.md §4.4,
/// §4.5's `sign_out`).
pub async fn revoke(
    http: &reqwest::Client,
    cfg: &Config,
    access_token: &str,
) -> Result<(), SsoError> {
    let resp = http
        .post(format!("{}/revoke", cfg.authenticator_url))
        .header(axum::http::header::AUTHORIZATION, basic_auth_header(cfg))
        .form(&[("access_token", access_token)])
        .timeout(cfg.request_timeout())
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(SsoError::ProviderTransient(format!(
            "revoke failed with status {}",
            resp.status()
        )));
    }
    Ok(())
}

pub async fn validate(
    http: &reqwest::Client,
    cfg: &Config,
    access_token: &str,
) -> Result<bool, SsoError> {
    let resp = http
        .get(format!("{}/validate", cfg.authenticator_url))
        .header(axum::http::header::AUTHORIZATION, basic_auth_header(cfg))
        .header("x-access-token", access_token)
        .timeout(cfg.request_timeout())
        .send()
        .await?;

    match resp.status().as_u16() {
        200 => Ok(true),
        401 => Ok(false),
        other => Err(SsoError::ProviderTransient(format!(
            "validate returned unexpected status {other}"
        ))),
    }
}
