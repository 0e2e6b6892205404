//! In-process backend.
//!
//! Mirrors the Redis backend key for key: values carry an absolute expiry
//! and are treated as absent once the clock passes it. Expired entries are
//! dropped when read, and every [`SWEEP_EVERY`] writes the whole store is
//! swept so keys that are never read again do not accumulate.

use super::{
    nonce_key, ttl_secs, used_key, user_key, NonceStore, RateLimitStore, StoreError, UserStore,
};
use crate::auth::address::EthAddress;
use crate::auth::nonce::generate_nonce;
use crate::clock::Clock;
use crate::models::User;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Writes between sweeps of expired entries and finished windows.
pub const SWEEP_EVERY: u64 = 256;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: u64,
}

#[derive(Debug)]
struct Window {
    started_at: u64,
    ends_at: u64,
    count: u64,
}

pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    windows: DashMap<String, Window>,
    users: DashMap<String, User>,
    writes: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            windows: DashMap::new(),
            users: DashMap::new(),
            writes: AtomicU64::new(0),
            clock,
        }
    }

    fn set_ex(&self, key: String, value: String, ttl: Duration) {
        let expires_at = self.clock.now() + ttl_secs(ttl);
        self.entries.insert(key, Entry { value, expires_at });
        self.record_write();
    }

    /// Count a write and sweep on every [`SWEEP_EVERY`]th one.
    ///
    /// Must not be called while holding a reference into either map.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            self.sweep();
        }
    }

    fn sweep(&self) {
        let now = self.clock.now();
        let entries_before = self.entries.len();
        let windows_before = self.windows.len();

        self.entries.retain(|_, entry| entry.expires_at > now);
        self.windows.retain(|_, window| window.ends_at > now);

        tracing::debug!(
            action = "memory_sweep",
            entries_removed = entries_before.saturating_sub(self.entries.len()),
            windows_removed = windows_before.saturating_sub(self.windows.len()),
            "Swept expired keys"
        );
    }

    fn get_live(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let live = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));

        match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }

    /// Number of nonce and marker entries held, expired ones included.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of rate-limit windows held, finished ones included.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl NonceStore for MemoryStore {
    async fn issue(&self, address: &EthAddress, ttl: Duration) -> Result<String, StoreError> {
        let nonce = generate_nonce();
        self.set_ex(nonce_key(address), nonce.clone(), ttl);
        Ok(nonce)
    }

    async fn read(&self, address: &EthAddress) -> Result<Option<String>, StoreError> {
        Ok(self.get_live(&nonce_key(address)))
    }

    async fn mark_used(
        &self,
        address: &EthAddress,
        nonce: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.set_ex(used_key(address, nonce), "1".to_string(), ttl);
        Ok(())
    }

    async fn is_used(&self, address: &EthAddress, nonce: &str) -> Result<bool, StoreError> {
        Ok(self.get_live(&used_key(address, nonce)).is_some())
    }

    async fn invalidate(&self, address: &EthAddress, nonce: &str) -> Result<(), StoreError> {
        self.entries.remove(&nonce_key(address));
        self.entries.remove(&used_key(address, nonce));
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let window_secs = ttl_secs(window);

        let count = {
            let mut current = self.windows.entry(key.to_string()).or_insert(Window {
                started_at: now,
                ends_at: now + window_secs,
                count: 0,
            });
            if now >= current.ends_at {
                current.started_at = now;
                current.ends_at = now + window_secs;
                current.count = 0;
            }
            current.count += 1;
            current.count
        };

        self.record_write();
        Ok(count)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert(&self, address: &EthAddress) -> Result<User, StoreError> {
        let now = self.clock.now();
        let user = self
            .users
            .entry(user_key(address))
            .or_insert_with(|| User {
                eth_address: address.clone(),
                created_at: now,
            })
            .value()
            .clone();
        Ok(user)
    }

    async fn get(&self, address: &EthAddress) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&user_key(address)).map(|u| u.value().clone()))
    }
}
