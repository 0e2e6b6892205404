//! API route handlers.

pub mod auth;

use crate::auth::Authenticator;
use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
}

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/nonce", post(auth::request_nonce))
        .route("/api/auth/verify", post(auth::verify))
        .route("/api/auth/params", get(auth::challenge_params))
}
