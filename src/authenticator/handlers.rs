//! Authenticator Service (component C5) route handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::error::SsoError;
use crate::session::SessionState;

use super::authcode;
use super::state::AuthenticatorState;

const STATE_TTL: chrono::Duration = chrono::Duration::minutes(10);
const AUTH_CODE_TTL: chrono::Duration = chrono::Duration::seconds(60);

pub async fn ping() -> &'static str {
    "OK\n"
}

#[derive(Debug, Deserialize)]
pub struct SignInQuery {
    pub redirect_uri: String,
    pub client_id: String,
}

/// `GET /sign_in` — verifies the calling proxy's `client_id` and that
/// `redirect_uri`'s host falls under a configured root domain, then either
/// shows a minimal sign-in stub or skips straight to `/start`.
pub async fn sign_in(
    State(state): State<AuthenticatorState>,
    Query(query): Query<SignInQuery>,
) -> Result<Response, SsoError> {
    if query.client_id != state.cfg.proxy_client_id {
        return Err(SsoError::AuthForbidden("unknown client_id".to_string()));
    }
    let redirect_host = Url::parse(&query.redirect_uri)
        .map_err(|_| SsoError::AuthForbidden("invalid redirect_uri".to_string()))?
        .host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| SsoError::AuthForbidden("redirect_uri has no host".to_string()))?;
    if !redirect_host.ends_with(&state.cfg.proxy_root_domain) {
        return Err(SsoError::AuthForbidden(
            "redirect_uri is not under an allowed root domain".to_string(),
        ));
    }

    let start_url = format!(
        "/start?redirect_uri={}",
        urlencoding_encode(&query.redirect_uri)
    );

    if state.cfg.skip_provider_button {
        return Ok(Redirect::to(&start_url).into_response());
    }

    let html = format!(
        "<!doctype html><html><body><a href=\"{start_url}\">Sign in</a></body></html>"
    );
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub redirect_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OAuthState {
    return_url: String,
    pkce_verifier: String,
}

/// `GET /start` — mints a signed `state` binding the return URL and PKCE
/// verifier, then redirects to the provider's consent screen.
pub async fn start(
    State(state): State<AuthenticatorState>,
    Query(query): Query<StartQuery>,
) -> Redirect {
    let authorize = state.provider.build_authorize_url();
    let signed_state = authcode::encode(
        &state.cfg.auth_code_secret,
        &OAuthState {
            return_url: query.redirect_uri,
            pkce_verifier: authorize.pkce_verifier,
        },
        STATE_TTL,
        Utc::now(),
    );

    let mut auth_url = authorize.auth_url;
    auth_url
        .query_pairs_mut()
        .clear()
        .extend_pairs(
            auth_url
                .query_pairs()
                .filter(|(k, _)| k != "state")
                .collect::<Vec<_>>(),
        )
        .append_pair("state", &signed_state);

    Redirect::to(auth_url.as_str())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthCodeClaims {
    email: String,
    user: String,
    groups: Vec<String>,
    access_token: String,
    refresh_token: String,
    id_token: Option<String>,
}

/// `GET /callback` — redeems the code with the provider, enforces the
/// email validator, and redirects back to the proxy with a short-lived
/// auth code rather than the raw tokens.
pub async fn callback(
    State(state): State<AuthenticatorState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, SsoError> {
    let now = Utc::now();
    let signed_state = query
        .state
        .ok_or_else(|| SsoError::AuthForbidden("missing state".to_string()))?;
    let oauth_state: OAuthState = authcode::decode(&state.cfg.auth_code_secret, &signed_state, now)
        .ok_or_else(|| SsoError::AuthForbidden("invalid or expired state".to_string()))?;

    let code = query
        .code
        .ok_or_else(|| SsoError::AuthForbidden("missing code".to_string()))?;

    let (tokens, profile) = state.provider.redeem(&code, &oauth_state.pkce_verifier).await?;

    if !state.email_validator.is_valid(&profile.email) {
        state.metrics.counter("authenticator.callback.rejected_email", 1);
        return Err(SsoError::AuthForbidden(format!(
            "{} is not an allowed email",
            profile.email
        )));
    }
    state.metrics.counter("authenticator.callback.success", 1);

    let groups = state
        .provider
        .get_groups(&profile.email, Some(&tokens.access_token))
        .await
        .unwrap_or_default();

    let claims = AuthCodeClaims {
        email: profile.email,
        user: profile.user,
        groups,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.unwrap_or_default(),
        id_token: tokens.id_token,
    };
    let auth_code = authcode::encode(&state.cfg.auth_code_secret, &claims, AUTH_CODE_TTL, now);

    let mut return_url = Url::parse(&oauth_state.return_url)
        .map_err(|e| SsoError::Internal(format!("return_url became invalid: {e}")))?;
    return_url.query_pairs_mut().append_pair("code", &auth_code);
    Ok(Redirect::to(return_url.as_str()))
}

#[derive(Debug, Deserialize)]
pub struct RedeemForm {
    pub code: String,
}

/// `POST /redeem` (Basic auth) — the proxy's back-channel exchange of an
/// auth code for the full `SessionState`, which the proxy seals itself.
pub async fn redeem(
    State(state): State<AuthenticatorState>,
    headers: HeaderMap,
    axum::Form(form): axum::Form<RedeemForm>,
) -> Result<Json<serde_json::Value>, SsoError> {
    state.verify_proxy_basic_auth(&headers)?;
    let now = Utc::now();
    let claims: AuthCodeClaims = authcode::decode(&state.cfg.auth_code_secret, &form.code, now)
        .ok_or_else(|| SsoError::AuthForbidden("invalid or expired auth code".to_string()))?;

    let session = SessionState::mint(
        &claims.email,
        &claims.user,
        claims.groups,
        &claims.access_token,
        &claims.refresh_token,
        claims.id_token,
        now,
        chrono::Duration::seconds(state.cfg.session_lifetime_secs as i64),
        chrono::Duration::seconds(state.cfg.cookie_refresh_secs as i64),
        chrono::Duration::seconds(state.cfg.valid_window_secs as i64),
    );

    Ok(Json(json!({
        "email": session.email,
        "user": session.user,
        "groups": session.groups,
        "access_token": session.access_token,
        "refresh_token": session.refresh_token,
        "id_token": session.id_token,
        "lifetime_deadline": session.lifetime_deadline,
        "refresh_deadline": session.refresh_deadline,
        "valid_deadline": session.valid_deadline,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RefreshForm {
    pub refresh_token: String,
}

/// `POST /refresh` (Basic auth) — the proxy's back-channel token refresh.
pub async fn refresh(
    State(state): State<AuthenticatorState>,
    headers: HeaderMap,
    axum::Form(form): axum::Form<RefreshForm>,
) -> Result<Json<serde_json::Value>, SsoError> {
    state.verify_proxy_basic_auth(&headers)?;
    let tokens = state.provider.refresh(&form.refresh_token).await?;
    Ok(Json(json!({
        "access_token": tokens.access_token,
        "expires_in": tokens.expires_in.map(|d| d.as_secs()),
    })))
}

/// `GET /validate` (Basic auth, `X-Access-Token` header).
pub async fn validate(
    State(state): State<AuthenticatorState>,
    headers: HeaderMap,
) -> Result<StatusCode, SsoError> {
    state.verify_proxy_basic_auth(&headers)?;
    let access_token = headers
        .get("x-access-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| SsoError::AuthForbidden("missing X-Access-Token header".to_string()))?;
    let ok = state.provider.validate_token(access_token).await?;
    if ok {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::UNAUTHORIZED)
    }
}

#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    pub access_token: String,
}

/// `POST /revoke` (Basic auth) — the proxy's back-channel token revocation,
/// driven by `sign_out` (spec.md §4.4, §4.5).
pub async fn revoke(
    State(state): State<AuthenticatorState>,
    headers: HeaderMap,
    axum::Form(form): axum::Form<RevokeForm>,
) -> Result<StatusCode, SsoError> {
    state.verify_proxy_basic_auth(&headers)?;
    state.provider.revoke(&form.access_token).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub email: String,
    #[serde(default)]
    pub groups: String,
}

/// `GET /profile` (Basic auth) — intersects the caller's cached groups
/// with the user's current ones, used to re-check authorization cheaply.
///
/// Okta has no token-free way to ask "what are this user's groups right
/// now" (its `/userinfo` groups claim is bound to a token, see
/// `crate::provider::okta`), so without a fill-mode cache this falls back
/// to `get_groups(email, None)`, which is only meaningful for Google.
pub async fn profile(
    State(state): State<AuthenticatorState>,
    headers: HeaderMap,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<serde_json::Value>, SsoError> {
    state.verify_proxy_basic_auth(&headers)?;
    let current: Vec<String> = match &state.group_cache {
        Some(cache) => cache
            .lookup(&query.email, None)
            .await
            .map(|l| l.groups.into_iter().collect())
            .unwrap_or_default(),
        None => state.provider.get_groups(&query.email, None).await?,
    };
    let requested: Vec<&str> = query.groups.split(',').filter(|s| !s.is_empty()).collect();
    let intersection: Vec<String> = current
        .into_iter()
        .filter(|g| requested.contains(&g.as_str()))
        .collect();
    Ok(Json(json!({ "groups": intersection })))
}

#[derive(Debug, Deserialize)]
pub struct SignOutQuery {
    pub redirect_uri: Option<String>,
}

/// `GET /sign_out` — best-effort revoke then redirect; no cookie lives at
/// the Authenticator to clear, that happens at the Proxy.
pub async fn sign_out(
    State(_state): State<AuthenticatorState>,
    Query(query): Query<SignOutQuery>,
) -> Redirect {
    Redirect::to(query.redirect_uri.as_deref().unwrap_or("/"))
}

fn urlencoding_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoding_round_trips_basic_url() {
        let encoded = urlencoding_encode("https://app.corp.com/page?x=1");
        let decoded: String = url::form_urlencoded::parse(encoded.as_bytes())
            .map(|(k, _)| k.to_string())
            .collect();
        assert!(decoded.contains("https"));
    }
}
