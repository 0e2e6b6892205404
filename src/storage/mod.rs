//! Storage layer for nonces, rate-limit counters and users.
//!
//! The authenticator only sees the traits below. Two backends implement all
//! of them:
//! - [`memory::MemoryStore`]: single-process expiring map
//! - [`redis::RedisStore`]: shared Redis, for multi-instance deployments
//!
//! Redis key patterns (the memory store uses the same keys):
//! - `nonce:{address}`: current nonce
//! - `nonce_used:{address}:{nonce}`: used marker
//! - `ratelimit:{limiter}:{key}`: fixed-window counter
//! - `user:{address}`: user record (JSON)
//!
//! Every nonce and counter key carries a TTL. Nothing sweeps them; an
//! expired key simply reads as absent.

pub mod memory;
pub mod redis;

use crate::auth::address::EthAddress;
use crate::models::User;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Single-use, expiring nonces keyed by address.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Generate and store a fresh nonce, replacing any earlier one for the address.
    async fn issue(&self, address: &EthAddress, ttl: Duration) -> Result<String, StoreError>;

    /// The live nonce for the address, or `None` if absent or expired.
    async fn read(&self, address: &EthAddress) -> Result<Option<String>, StoreError>;

    async fn mark_used(
        &self,
        address: &EthAddress,
        nonce: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn is_used(&self, address: &EthAddress, nonce: &str) -> Result<bool, StoreError>;

    /// Delete the nonce and its used marker. Deleting what is already gone is fine.
    async fn invalidate(&self, address: &EthAddress, nonce: &str) -> Result<(), StoreError>;
}

/// Fixed-window counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one hit against `key` and return the count for the current
    /// window, this hit included. The window starts at the first hit.
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user if missing; an existing record is returned unchanged.
    async fn upsert(&self, address: &EthAddress) -> Result<User, StoreError>;

    /// Read-only lookup for tests and for collaborators sharing the store.
    /// Sign-in itself only ever calls [`UserStore::upsert`].
    async fn get(&self, address: &EthAddress) -> Result<Option<User>, StoreError>;
}

pub(crate) fn nonce_key(address: &EthAddress) -> String {
    format!("nonce:{}", address)
}

pub(crate) fn used_key(address: &EthAddress, nonce: &str) -> String {
    format!("nonce_used:{}:{}", address, nonce)
}

pub(crate) fn user_key(address: &EthAddress) -> String {
    format!("user:{}", address)
}

/// TTLs are whole seconds with a floor of one, matching Redis `SET EX`.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
