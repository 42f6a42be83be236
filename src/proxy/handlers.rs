//! Proxy Service (component C8): enforces that every request to a
//! protected upstream carries a valid session, driving the state machine
//! via the Authenticator's back channels, then forwards and signs.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, warn};

use crate::config::UpstreamOptions;
use crate::error::SsoError;
use crate::groupcache::is_authorized;
use crate::router::strip_port;
use crate::session::machine::{self, Action, ValidateOutcome};
use crate::session::SessionState;
use crate::signer::{hash_body, CanonicalRequest};

use super::backchannel;
use super::state::ProxyState;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub async fn ping() -> &'static str {
    "OK\n"
}

/// `GET /oauth2/v1/certs` — publishes the request signer's public key as a
/// JWKS document so upstreams can verify `Sso-Signature` without a shared
/// secret (spec.md §4.6, §6).
pub async fn jwks(State(state): State<ProxyState>) -> axum::Json<serde_json::Value> {
    axum::Json(state.signer.jwks())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub then: Option<String>,
}

/// `GET /oauth2/callback` — receives the short-lived auth code from the
/// Authenticator, redeems it, seals a fresh cookie, and redirects to the
/// originally requested URL.
pub async fn oauth2_callback(
    State(state): State<ProxyState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, SsoError> {
    let code = query
        .code
        .ok_or_else(|| SsoError::AuthForbidden("missing code".to_string()))?;
    let session = backchannel::redeem(&state.http, &state.cfg, &code).await?;

    let now = Utc::now();
    let sealed = state
        .cookie_store
        .seal(&session, now)
        .map_err(SsoError::Internal)?;
    let cookie = state
        .cookie_store
        .build_cookie(sealed, time::Duration::seconds(state.cfg.cookie_expire_secs as i64));

    let destination = query.then.unwrap_or_else(|| "/".to_string());
    let mut response = Redirect::to(&destination).into_response();
    response.headers_mut().append(
        axum::http::header::SET_COOKIE,
        HeaderValue::from_str(&cookie.to_string()).expect("cookie header value is valid"),
    );
    Ok(response)
}

/// `GET /oauth2/sign_out` — revokes (best-effort) and clears the cookie.
pub async fn oauth2_sign_out(State(state): State<ProxyState>, headers: HeaderMap) -> Response {
    if let Some(value) = extract_cookie(&headers, state.cookie_store.cookie_name()) {
        if let Some(session) = state.cookie_store.open(&value) {
            if let Err(err) = backchannel::revoke(&state.http, &state.cfg, &session.access_token).await {
                warn!(error = %err, "revoke call failed during sign-out, clearing cookie anyway");
            }
        }
    }
    let clear = state.cookie_store.build_clear_cookie();
    let mut response = Redirect::to("/").into_response();
    response.headers_mut().append(
        axum::http::header::SET_COOKIE,
        HeaderValue::from_str(&clear.to_string()).expect("cookie header value is valid"),
    );
    response
}

/// Catch-all fallback: every request to a protected upstream host passes
/// through here.
pub async fn forward(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    match forward_inner(state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn forward_inner(state: ProxyState, request: Request<Body>) -> Result<Response, SsoError> {
    state.metrics.counter("proxy.request", 1);

    let host_header = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let host = strip_port(host_header);

    let Some(matched) = state.router.route(host) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let upstream = matched.upstream.clone();
    let target_base = matched.target_base.clone();
    let path = request.uri().path();

    let skip_auth_patterns = crate::config::compile_skip_auth(&upstream.options.skip_auth_regex)
        .map_err(|e| SsoError::Config(e.to_string()))?;
    let bypass_auth = skip_auth_patterns.iter().any(|p| p.is_match(path));

    let (session, access_token_for_signing, refreshed_cookie) = if bypass_auth {
        (None, None, None)
    } else {
        let cookie_name = upstream
            .options
            .cookie_name_override
            .clone()
            .unwrap_or_else(|| state.cookie_store.cookie_name().to_string());
        let session_opt = extract_cookie(request.headers(), &cookie_name)
            .and_then(|value| state.cookie_store.open(&value));

        match session_opt {
            None => {
                state.metrics.counter("proxy.auth_required", 1);
                return Ok(redirect_to_sign_in(&state, &request, host, false));
            }
            Some(mut session) => {
                let now = Utc::now();
                let original = session.clone();
                let validation = if session.needs_validation(now) {
                    Some(run_validation(&state, &session).await)
                } else {
                    None
                };
                let action = machine::transition(&session, now, state.cfg.grace_period(), validation);
                match drive_action(&state, &mut session, action).await? {
                    DriveResult::Allow => {}
                    DriveResult::Redirect => {
                        state.metrics.counter("proxy.session_expired", 1);
                        return Ok(redirect_to_sign_in(&state, &request, host, true));
                    }
                }

                if !validate_authorization(&state, &upstream.options, &session).await? {
                    state.metrics.counter("proxy.forbidden", 1);
                    return Err(SsoError::AuthForbidden(
                        "email or group not permitted for this upstream".to_string(),
                    ));
                }

                let access_token = session.access_token.clone();
                let new_cookie = if session == original {
                    None
                } else {
                    let sealed = state.cookie_store.seal(&session, now).map_err(SsoError::Internal)?;
                    Some(state.cookie_store.build_cookie(
                        sealed,
                        time::Duration::seconds(state.cfg.cookie_expire_secs as i64),
                    ))
                };
                (Some(session), Some(access_token), new_cookie)
            }
        }
    };

    let dispatch_started = std::time::Instant::now();
    let mut response = dispatch_upstream(
        &state,
        &upstream,
        &target_base,
        request,
        session,
        access_token_for_signing,
    )
    .await?;
    state.metrics.timing("proxy.upstream.duration", dispatch_started.elapsed());
    if let Some(cookie) = refreshed_cookie {
        response.headers_mut().append(
            axum::http::header::SET_COOKIE,
            HeaderValue::from_str(&cookie.to_string()).expect("cookie header value is valid"),
        );
    }
    Ok(response)
}

async fn run_validation(state: &ProxyState, session: &SessionState) -> ValidateOutcome {
    match backchannel::validate(&state.http, &state.cfg, &session.access_token).await {
        Ok(true) => ValidateOutcome::Ok,
        Ok(false) => ValidateOutcome::HardFailure,
        Err(SsoError::ProviderPermanent(_)) => ValidateOutcome::HardFailure,
        Err(other) => {
            warn!(error = %other, "validate call failed transiently");
            ValidateOutcome::TransientFailure
        }
    }
}

enum DriveResult {
    Allow,
    Redirect,
}

/// Executes whatever back-channel call `action` requires and mutates
/// `session` in place so the caller can reseal the cookie if needed.
async fn drive_action(
    state: &ProxyState,
    session: &mut SessionState,
    action: Action,
) -> Result<DriveResult, SsoError> {
    match action {
        Action::Allow => Ok(DriveResult::Allow),
        Action::AllowAndBumpValid => {
            session.bump_valid_deadline(Utc::now(), chrono::Duration::seconds(state.cfg.valid_window_secs as i64));
            Ok(DriveResult::Allow)
        }
        Action::AllowUnderGrace => {
            session.enter_grace(Utc::now());
            Ok(DriveResult::Allow)
        }
        Action::RequireRefresh => {
            match backchannel::refresh(&state.http, &state.cfg, &session.refresh_token).await {
                Ok((access_token, _expires_in)) => {
                    session.apply_refresh(
                        access_token,
                        None,
                        Utc::now(),
                        chrono::Duration::seconds(state.cfg.cookie_refresh_secs as i64),
                        chrono::Duration::seconds(state.cfg.valid_window_secs as i64),
                    );
                    Ok(DriveResult::Allow)
                }
                Err(SsoError::ProviderPermanent(_)) => Ok(DriveResult::Redirect),
                Err(other) => {
                    warn!(error = %other, "refresh failed transiently, treating as sign-in required");
                    Ok(DriveResult::Redirect)
                }
            }
        }
        Action::Revoke | Action::ExpireAndRedirect => Ok(DriveResult::Redirect),
        Action::RedirectToSignIn => Ok(DriveResult::Redirect),
    }
}

async fn validate_authorization(
    state: &ProxyState,
    options: &UpstreamOptions,
    session: &SessionState,
) -> Result<bool, SsoError> {
    if !options.allowed_email_domains.is_empty() {
        let domain_ok = session
            .email
            .split_once('@')
            .map(|(_, d)| options.allowed_email_domains.iter().any(|allowed| allowed.eq_ignore_ascii_case(d)))
            .unwrap_or(false);
        if !domain_ok {
            return Ok(false);
        }
    }
    if !options.allowed_email_addresses.is_empty()
        && !options
            .allowed_email_addresses
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&session.email))
    {
        return Ok(false);
    }

    if options.allowed_groups.is_empty() {
        return Ok(true);
    }

    let groups = match &state.group_cache {
        Some(cache) => cache
            .lookup(&session.email, Some(&session.access_token))
            .await
            .map(|l| l.groups)
            .unwrap_or_default(),
        None => session.groups.iter().cloned().collect(),
    };
    Ok(is_authorized(&groups, &options.allowed_groups))
}

fn redirect_to_sign_in(
    state: &ProxyState,
    request: &Request<Body>,
    host: &str,
    clear_cookie: bool,
) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let original_url = format!("https://{host}{path_and_query}");
    let callback_then = format!("https://{host}/oauth2/callback?then={}", urlencode(&original_url));
    let sign_in_url = format!(
        "{}/sign_in?redirect_uri={}&client_id={}",
        state.cfg.authenticator_url,
        urlencode(&callback_then),
        urlencode(&state.cfg.proxy_client_id)
    );
    let mut response = Redirect::to(&sign_in_url).into_response();
    if clear_cookie {
        let clear = state.cookie_store.build_clear_cookie();
        response.headers_mut().append(
            axum::http::header::SET_COOKIE,
            HeaderValue::from_str(&clear.to_string()).expect("cookie header value is valid"),
        );
    }
    response
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some((k, v)) = pair.split_once('=') {
            if k == name {
                return Some(v.to_string());
            }
        }
    }
    None
}

async fn dispatch_upstream(
    state: &ProxyState,
    upstream: &crate::config::UpstreamConfig,
    target_base: &str,
    request: Request<Body>,
    session: Option<SessionState>,
    access_token_for_signing: Option<String>,
) -> Result<Response, SsoError> {
    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| SsoError::Internal(format!("failed reading request body: {e}")))?;

    let target_url = format!(
        "{}{}",
        target_base.trim_end_matches('/'),
        parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/")
    );

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| SsoError::Internal(format!("invalid method: {e}")))?;

    // Collected outbound headers, not the inbound ones, so the signature
    // below covers what the upstream actually receives (the x-forwarded-*
    // assertions added here, not their absence on the original request).
    let mut outbound_headers: Vec<(String, String)> = Vec::new();
    for (name, value) in parts.headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "host" || lower == "cookie" || lower == "content-length" {
            continue;
        }
        if let Ok(v) = value.to_str() {
            outbound_headers.push((name.as_str().to_string(), v.to_string()));
        }
    }

    if upstream.options.pass_host_header {
        if let Some(host) = parts.headers.get(axum::http::header::HOST) {
            if let Ok(h) = host.to_str() {
                outbound_headers.push((axum::http::header::HOST.as_str().to_string(), h.to_string()));
            }
        }
    }

    if let Some(session) = &session {
        if upstream.options.set_xauth_request_headers {
            outbound_headers.push(("x-forwarded-user".to_string(), session.user.clone()));
            outbound_headers.push(("x-forwarded-email".to_string(), session.email.clone()));
            outbound_headers.push(("x-forwarded-groups".to_string(), session.groups.join(",")));
        }
        if upstream.options.pass_user_headers {
            if let Some(token) = &access_token_for_signing {
                outbound_headers.push(("x-forwarded-access-token".to_string(), token.clone()));
            }
        }
    }

    for (name, value) in &upstream.options.inject_request_headers {
        outbound_headers.push((name.clone(), value.clone()));
    }

    let mut builder = state.http.request(method, &target_url);
    for (name, value) in &outbound_headers {
        builder = builder.header(name, value);
    }

    if !upstream.options.skip_request_signing {
        let canonical = CanonicalRequest {
            headers: outbound_headers,
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            body_hash: hash_body(&body_bytes),
        };
        let signature = state.signer.sign(&canonical);
        builder = builder
            .header("sso-signature", signature)
            .header("kid", state.signer.kid());
    }

    let timeout = upstream
        .options
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.cfg.tcp_read_timeout());
    builder = builder.timeout(timeout).body(body_bytes.to_vec());

    let upstream_response = builder
        .send()
        .await
        .map_err(|e| SsoError::ProviderTransient(format!("upstream request failed: {e}")))?;

    let status = upstream_response.status();
    let response_headers = upstream_response.headers().clone();
    let response_body = upstream_response
        .bytes()
        .await
        .map_err(|e| SsoError::Internal(format!("failed reading upstream response: {e}")))?;

    let mut response = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        response = response.header(name, value);
    }
    response
        .body(Body::from(response_body))
        .map_err(|e| {
            error!(error = %e, "failed to build upstream response");
            SsoError::Internal("failed to build upstream response".to_string())
        })
}
