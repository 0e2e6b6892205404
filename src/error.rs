//! Authentication failure taxonomy and Axum response conversions.
//!
//! Every failure is a normal, client-retryable outcome. Exactly one reason
//! is reported per request: the first check that fails.

use crate::auth::address::InvalidAddress;
use crate::auth::message::{FreshnessError, ParseError, ValidationError};
use crate::auth::verify::SignatureError;
use crate::storage::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid Ethereum address")]
    InvalidAddress,

    #[error("Nonce not found or expired")]
    NonceNotFound,

    #[error("Nonce already used")]
    NonceAlreadyUsed,

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] ParseError),

    #[error("Domain does not match")]
    DomainMismatch,

    #[error("URI does not match")]
    UriMismatch,

    #[error("Chain {0} is not supported")]
    UnsupportedChain(u64),

    #[error("Application name does not match")]
    AppNameMismatch,

    #[error("Nonce does not match")]
    NonceMismatch,

    #[error("Signature expired")]
    SignatureExpired,

    #[error("Message timestamp is in the future")]
    InvalidTimestamp,

    #[error("Malformed signature: {0}")]
    SignatureMalformed(#[from] SignatureError),

    #[error("Signature does not match address")]
    SignatureAddressMismatch,

    /// Carries the store error for logs; never sent to the client.
    #[error("Persistence failure: {0}")]
    UserPersistenceFailure(String),
}

impl AuthError {
    /// Stable reason code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::RateLimited => "RATE_LIMITED",
            AuthError::InvalidAddress => "INVALID_ADDRESS",
            AuthError::NonceNotFound => "NONCE_NOT_FOUND",
            AuthError::NonceAlreadyUsed => "NONCE_ALREADY_USED",
            AuthError::MalformedMessage(_) => "MALFORMED_MESSAGE",
            AuthError::DomainMismatch => "DOMAIN_MISMATCH",
            AuthError::UriMismatch => "URI_MISMATCH",
            AuthError::UnsupportedChain(_) => "UNSUPPORTED_CHAIN",
            AuthError::AppNameMismatch => "APP_NAME_MISMATCH",
            AuthError::NonceMismatch => "NONCE_MISMATCH",
            AuthError::SignatureExpired => "SIGNATURE_EXPIRED",
            AuthError::InvalidTimestamp => "INVALID_TIMESTAMP",
            AuthError::SignatureMalformed(_) => "SIGNATURE_MALFORMED",
            AuthError::SignatureAddressMismatch => "SIGNATURE_ADDRESS_MISMATCH",
            AuthError::UserPersistenceFailure(_) => "USER_PERSISTENCE_FAILURE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::InvalidAddress
            | AuthError::MalformedMessage(_)
            | AuthError::InvalidTimestamp
            | AuthError::SignatureMalformed(_) => StatusCode::BAD_REQUEST,
            AuthError::UserPersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::UserPersistenceFailure(msg) => {
                // Log detailed error server-side, return generic message to client
                tracing::error!(error = %msg, "Store failure during authentication");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (self.status(), body).into_response()
    }
}

impl From<InvalidAddress> for AuthError {
    fn from(_: InvalidAddress) -> Self {
        AuthError::InvalidAddress
    }
}

impl From<ValidationError> for AuthError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::DomainMismatch => AuthError::DomainMismatch,
            ValidationError::UriMismatch => AuthError::UriMismatch,
            ValidationError::UnsupportedChain(id) => AuthError::UnsupportedChain(id),
            ValidationError::AppNameMismatch => AuthError::AppNameMismatch,
        }
    }
}

impl From<FreshnessError> for AuthError {
    fn from(err: FreshnessError) -> Self {
        match err {
            FreshnessError::Expired { .. } => AuthError::SignatureExpired,
            FreshnessError::FromFuture => AuthError::InvalidTimestamp,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::UserPersistenceFailure(err.to_string())
    }
}
