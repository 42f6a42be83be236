use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use base64::Engine;
use tokio::net::TcpListener;
use tower::ServiceExt;

use ssoedge::config::{Config, ProviderKind, RouteKind, UpstreamConfig, UpstreamOptions};
use ssoedge::crypto::cookie::SealedCookieStore;
use ssoedge::metrics::Metrics;
use ssoedge::proxy::{router, ProxyState};
use ssoedge::router::HostRouter;
use ssoedge::signer::RequestSigner;

fn test_config() -> Config {
    Config {
        cookie_secret: base64::engine::general_purpose::STANDARD.encode([4u8; 32]),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        provider: ProviderKind::Google,
        proxy_client_id: "proxy-client".to_string(),
        proxy_client_secret: "proxy-secret".to_string(),
        proxy_root_domain: "corp.com".to_string(),
        auth_code_secret: "auth-code-secret".to_string(),
        email_domain: Some("corp.com".to_string()),
        oauth_callback_url: "https://auth.corp.com/callback".to_string(),
        authenticator_url: "https://auth.corp.com".to_string(),
        ..Config::default()
    }
}

async fn spawn_fake_upstream() -> String {
    let app = axum::Router::new().route("/hello", get(|| async { "hello from upstream" }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn state_with_upstreams(upstreams: Vec<UpstreamConfig>) -> ProxyState {
    let cfg = Arc::new(test_config());
    let cookie_store = Arc::new(
        SealedCookieStore::new(
            &cfg.cookie_secret,
            None,
            cfg.cookie_name.clone(),
            !cfg.insecure_cookie,
            cfg.cookie_domain.clone(),
        )
        .unwrap(),
    );
    let router_table = Arc::new(HostRouter::new(upstreams).unwrap());
    let signer = Arc::new(RequestSigner::generate(2048).unwrap());
    let metrics = Metrics::from_config(&cfg);
    ProxyState {
        cfg,
        cookie_store,
        http: reqwest::Client::new(),
        router: router_table,
        signer,
        group_cache: None,
        metrics,
    }
}

#[tokio::test]
async fn ping_is_always_ok_regardless_of_host() {
    let app = router(state_with_upstreams(vec![]));
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header("host", "whatever.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "OK\n".as_bytes());
}

#[tokio::test]
async fn unmatched_host_returns_404() {
    let app = router(state_with_upstreams(vec![]));
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/anything")
                .header("host", "unknown.corp.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn skip_auth_path_forwards_without_a_cookie() {
    let upstream_base = spawn_fake_upstream().await;
    let upstream = UpstreamConfig {
        from_host: "app.corp.com".to_string(),
        from_host_is_regex: false,
        to_url: upstream_base,
        route_kind: RouteKind::Simple,
        options: UpstreamOptions {
            skip_auth_regex: vec!["^/hello$".to_string()],
            skip_request_signing: true,
            ..UpstreamOptions::default()
        },
    };
    let app = router(state_with_upstreams(vec![upstream]));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/hello")
                .header("host", "app.corp.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "hello from upstream".as_bytes());
}

#[tokio::test]
async fn rewrite_route_dispatches_to_the_substituted_target() {
    let upstream_base = spawn_fake_upstream().await;
    let port = upstream_base.rsplit(':').next().unwrap().to_string();
    let upstream = UpstreamConfig {
        from_host: r"^tenant-(\d+)\.corp\.com$".to_string(),
        from_host_is_regex: true,
        to_url: "http://127.0.0.1:$1".to_string(),
        route_kind: RouteKind::Rewrite,
        options: UpstreamOptions {
            skip_auth_regex: vec!["^/hello$".to_string()],
            skip_request_signing: true,
            ..UpstreamOptions::default()
        },
    };
    let app = router(state_with_upstreams(vec![upstream]));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/hello")
                .header("host", format!("tenant-{port}.corp.com"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "hello from upstream".as_bytes());
}

#[tokio::test]
async fn jwks_endpoint_publishes_the_signer_public_key() {
    let app = router(state_with_upstreams(vec![]));
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/oauth2/v1/certs")
                .header("host", "whatever.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["keys"][0]["kid"].is_string());
    assert_eq!(json["keys"][0]["kty"], "RSA");
}

#[tokio::test]
async fn missing_cookie_redirects_to_authenticator_sign_in() {
    let upstream = UpstreamConfig {
        from_host: "app.corp.com".to_string(),
        from_host_is_regex: false,
        to_url: "http://127.0.0.1:1".to_string(),
        route_kind: RouteKind::Simple,
        options: UpstreamOptions::default(),
    };
    let app = router(state_with_upstreams(vec![upstream]));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/dashboard")
                .header("host", "app.corp.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let location = resp
        .headers()
        .get(axum::http::header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.starts_with("https://auth.corp.com/sign_in?"));
}
