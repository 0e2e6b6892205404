//! Auth API endpoints.

use super::AppState;
use crate::error::AuthError;
use crate::models::{AuthRequest, AuthResponse, ChallengeParams, NonceRequest, NonceResponse};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    response::IntoResponse,
    Json,
};
use std::net::SocketAddr;

/// POST /api/auth/nonce: Issue a nonce for an address
///
/// An unreadable body is treated as an empty address.
pub async fn request_nonce(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Result<Json<NonceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let req = body_or_default(body, "auth/nonce");
    let nonce = state.auth.request_nonce(addr.ip(), &req.address).await?;
    Ok(Json(NonceResponse { nonce }))
}

/// POST /api/auth/verify: Verify a signed challenge
///
/// An unreadable body still counts as an attempt: it goes through the rate
/// limit and then fails as an invalid address.
pub async fn verify(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let req = body_or_default(body, "auth/verify");
    let user = state.auth.authenticate(addr.ip(), &req).await?;
    Ok(Json(AuthResponse {
        address: user.eth_address.to_string(),
        created_at: user.created_at,
    }))
}

/// Unwrap a JSON body, or fall back to an all-empty request.
///
/// The rejection text is logged, never returned.
fn body_or_default<T: Default>(body: Result<Json<T>, JsonRejection>, endpoint: &str) -> T {
    match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            tracing::debug!(endpoint, error = %rejection.body_text(), "Unreadable request body");
            T::default()
        }
    }
}

/// GET /api/auth/params: Values a client needs to build the challenge
pub async fn challenge_params(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.auth.config();
    Json(ChallengeParams {
        domain: config.domain.clone(),
        uri: config.uri.clone(),
        app_name: config.app_name.clone(),
        chain_ids: config.allowed_chains.iter().map(|c| c.id()).collect(),
        nonce_ttl_secs: config.nonce_ttl.as_secs(),
        message_max_age_secs: config.message_max_age.as_secs(),
    })
}
