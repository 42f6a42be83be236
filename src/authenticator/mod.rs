//! Authenticator Service (component C5): brokers OAuth2 flows and exposes
//! the back-channel endpoints the Proxy calls to mint/refresh/validate
//! sessions without ever holding tokens itself.

pub mod authcode;
pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use state::AuthenticatorState;

pub fn router(state: AuthenticatorState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/sign_in", get(handlers::sign_in))
        .route("/start", get(handlers::start))
        .route("/callback", get(handlers::callback))
        .route("/redeem", post(handlers::redeem))
        .route("/refresh", post(handlers::refresh))
        .route("/revoke", post(handlers::revoke))
        .route("/validate", get(handlers::validate))
        .route("/profile", get(handlers::profile))
        .route("/sign_out", get(handlers::sign_out))
        .with_state(state)
}
