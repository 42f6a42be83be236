use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use base64::Engine;
use tower::ServiceExt;

use ssoedge::authenticator::{router, AuthenticatorState};
use ssoedge::config::{Config, EmailValidator, ProviderKind};
use ssoedge::metrics::Metrics;

fn test_config() -> Config {
    Config {
        cookie_secret: base64::engine::general_purpose::STANDARD.encode([9u8; 32]),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        provider: ProviderKind::Google,
        proxy_client_id: "proxy-client".to_string(),
        proxy_client_secret: "proxy-secret".to_string(),
        proxy_root_domain: "corp.com".to_string(),
        auth_code_secret: "auth-code-secret".to_string(),
        email_domain: Some("corp.com".to_string()),
        oauth_callback_url: "https://auth.corp.com/callback".to_string(),
        ..Config::default()
    }
}

fn state() -> AuthenticatorState {
    let cfg = Arc::new(test_config());
    let provider = ssoedge::build_provider(&cfg).unwrap();
    let email_validator = Arc::new(EmailValidator::from_config(&cfg));
    let metrics = Metrics::from_config(&cfg);
    AuthenticatorState {
        cfg,
        provider,
        email_validator,
        group_cache: None,
        metrics,
    }
}

#[tokio::test]
async fn ping_is_always_ok() {
    let app = router(state());
    let resp = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "OK\n".as_bytes());
}

#[tokio::test]
async fn sign_in_rejects_unknown_client_id() {
    let app = router(state());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/sign_in?redirect_uri=https%3A%2F%2Fapp.corp.com%2F&client_id=someone-else")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sign_in_rejects_redirect_uri_outside_root_domain() {
    let app = router(state());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/sign_in?redirect_uri=https%3A%2F%2Fevil.example.com%2F&client_id=proxy-client")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sign_in_redirects_to_start_when_provider_button_skipped() {
    let mut cfg = test_config();
    cfg.skip_provider_button = true;
    let cfg = Arc::new(cfg);
    let provider = ssoedge::build_provider(&cfg).unwrap();
    let app = router(AuthenticatorState {
        email_validator: Arc::new(EmailValidator::from_config(&cfg)),
        metrics: Metrics::from_config(&cfg),
        cfg,
        provider,
        group_cache: None,
    });

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/sign_in?redirect_uri=https%3A%2F%2Fapp.corp.com%2F&client_id=proxy-client")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let location = resp.headers().get(axum::http::header::LOCATION).unwrap();
    assert!(location.to_str().unwrap().starts_with("/start?"));
}

#[tokio::test]
async fn validate_requires_basic_auth() {
    let app = router(state());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/validate")
                .header("x-access-token", "whatever")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn redeem_rejects_invalid_auth_code() {
    let app = router(state());
    let basic = base64::engine::general_purpose::STANDARD.encode("proxy-client:proxy-secret");
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/redeem")
                .header("authorization", format!("Basic {basic}"))
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("code=not-a-real-code"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
