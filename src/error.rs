//! Error taxonomy shared by the authenticator and proxy binaries.
//!
//! Mirrors spec.md §7: each variant maps to exactly one HTTP outcome, and
//! that mapping lives here once instead of being re-decided at every call
//! site.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;
use thiserror::Error as ThisError;
use tracing::error;

#[derive(Debug, ThisError)]
pub enum SsoError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication required")]
    AuthRequired { sign_in_url: String },

    #[error("forbidden: {0}")]
    AuthForbidden(String),

    #[error("identity provider temporarily unavailable: {0}")]
    ProviderTransient(String),

    #[error("identity provider rejected the credential: {0}")]
    ProviderPermanent(String),

    #[error("upstream error: status={status}")]
    UpstreamError {
        status: StatusCode,
        body: Vec<u8>,
        content_type: Option<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("http client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("oauth2 token request failed: {0}")]
    Oauth2Token(String),
}

/// Coarse classification used by callers deciding whether a failed provider
/// call may still be served from a stale cache within the grace period.
pub trait IsRetryable {
    fn is_transient(&self) -> bool;
}

impl IsRetryable for SsoError {
    fn is_transient(&self) -> bool {
        matches!(self, SsoError::ProviderTransient(_) | SsoError::Reqwest(_))
    }
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        match self {
            SsoError::Config(msg) => {
                error!(error = %msg, "configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "config_error"})),
                )
                    .into_response()
            }
            SsoError::AuthRequired { sign_in_url } => Redirect::to(&sign_in_url).into_response(),
            SsoError::AuthForbidden(reason) => (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "forbidden", "reason": reason})),
            )
                .into_response(),
            SsoError::ProviderTransient(reason) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "provider_unavailable", "reason": reason})),
            )
                .into_response(),
            SsoError::ProviderPermanent(reason) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "provider_rejected", "reason": reason})),
            )
                .into_response(),
            SsoError::UpstreamError {
                status,
                body,
                content_type,
            } => {
                let mut resp = Response::builder().status(status);
                if let Some(ct) = content_type {
                    resp = resp.header(axum::http::header::CONTENT_TYPE, ct);
                }
                resp.body(axum::body::Body::from(body))
                    .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
            }
            SsoError::Internal(msg) => {
                let correlation = correlation_id();
                error!(error = %msg, correlation_id = %correlation, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal_error", "correlation_id": correlation})),
                )
                    .into_response()
            }
            SsoError::UrlParse(e) => {
                error!(error = %e, "url parse error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            SsoError::Reqwest(e) => {
                error!(error = %e, "http client error");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({"error": "provider_unavailable"})),
                )
                    .into_response()
            }
            SsoError::Json(e) => {
                error!(error = %e, "json error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            SsoError::Oauth2Token(msg) => {
                error!(error = %msg, "oauth2 token request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({"error": "oauth2_token_error"})),
                )
                    .into_response()
            }
        }
    }
}

fn correlation_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
