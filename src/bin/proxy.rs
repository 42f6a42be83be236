use std::sync::Arc;

use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ssoedge::config::UpstreamsFile;
use ssoedge::crypto::cookie::SealedCookieStore;
use ssoedge::router::HostRouter;
use ssoedge::signer::RequestSigner;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = ssoedge::config::Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_level(true).with_target(false))
        .init();

    info!(listen_addr = %cfg.listen_addr, provider = ?cfg.provider, "starting proxy");

    let cfg = Arc::new(cfg);

    let cookie_store = Arc::new(SealedCookieStore::new(
        &cfg.cookie_secret,
        cfg.cookie_secret_old.as_deref(),
        cfg.cookie_name.clone(),
        !cfg.insecure_cookie,
        cfg.cookie_domain.clone(),
    )?);

    let upstreams = match &cfg.upstreams_config {
        Some(path) => UpstreamsFile::load(path)?.upstreams,
        None => Vec::new(),
    };
    let router_table = Arc::new(HostRouter::new(upstreams)?);

    let signer = Arc::new(RequestSigner::generate(2048)?);

    let provider = ssoedge::build_provider(&cfg)?;
    let group_cache = ssoedge::build_group_cache(&cfg, provider.clone());
    let metrics = ssoedge::metrics::Metrics::from_config(&cfg);

    let state = ssoedge::proxy::ProxyState {
        cfg: cfg.clone(),
        cookie_store,
        http: reqwest::Client::new(),
        router: router_table,
        signer,
        group_cache: group_cache.clone(),
        metrics,
    };
    let app = ssoedge::proxy::router(state);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!(addr = %cfg.listen_addr, "proxy listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(cache) = &group_cache {
        if let ssoedge::groupcache::GroupCache::Fill(fill) = cache.as_ref() {
            fill.stop();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
