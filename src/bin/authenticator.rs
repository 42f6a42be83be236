use std::sync::Arc;

use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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

    info!(listen_addr = %cfg.listen_addr, provider = ?cfg.provider, "starting authenticator");

    let cfg = Arc::new(cfg);
    let provider = ssoedge::build_provider(&cfg)?;
    let group_cache = ssoedge::build_group_cache(&cfg, provider.clone());
    let email_validator = Arc::new(ssoedge::config::EmailValidator::from_config(&cfg));
    let metrics = ssoedge::metrics::Metrics::from_config(&cfg);

    let state = ssoedge::authenticator::AuthenticatorState {
        cfg: cfg.clone(),
        provider,
        email_validator,
        group_cache: group_cache.clone(),
        metrics,
    };
    let app = ssoedge::authenticator::router(state);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!(addr = %cfg.listen_addr, "authenticator listening");
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
