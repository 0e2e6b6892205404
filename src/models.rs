//! Request, response and storage models.
//!
//! All models use serde for serialization/deserialization.

use crate::auth::address::EthAddress;
use serde::{Deserialize, Serialize};

// ============================================================================
// Auth Models
// ============================================================================

/// Request for a sign-in nonce.
#[derive(Debug, Default, Deserialize)]
pub struct NonceRequest {
    pub address: String,
}

/// Response containing the nonce to embed in the challenge message.
#[derive(Debug, Serialize)]
pub struct NonceResponse {
    pub nonce: String, // hex
}

/// Signed challenge submitted for verification.
///
/// `message` and `signature` are opaque here; the authenticator parses them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthRequest {
    pub address: String,
    pub message: String,
    pub signature: String, // hex r || s || v
}

/// Response after successful verification.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub address: String,
    pub created_at: u64,
}

/// What a client needs to build a challenge message.
#[derive(Debug, Serialize)]
pub struct ChallengeParams {
    pub domain: String,
    pub uri: String,
    pub app_name: String,
    pub chain_ids: Vec<u64>,
    pub nonce_ttl_secs: u64,
    pub message_max_age_secs: u64,
}

// ============================================================================
// Storage Models
// ============================================================================

/// A signed-in identity, stored under `user:{address}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub eth_address: EthAddress,
    pub created_at: u64,
}
