//! Proxy Service (component C8): wraps every protected upstream with the
//! session-enforcing handler, integrating the cookie store, identity
//! provider back channels, group cache, request signer, and host router.

pub mod backchannel;
pub mod handlers;
pub mod state;

use axum::routing::get;
use axum::Router;

pub use state::ProxyState;

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/oauth2/callback", get(handlers::oauth2_callback))
        .route("/oauth2/sign_out", get(handlers::oauth2_sign_out))
        .route("/oauth2/v1/certs", get(handlers::jwks))
        .fallback(handlers::forward)
        .with_state(state)
}
