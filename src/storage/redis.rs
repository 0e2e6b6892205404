//! Redis backend.
//!
//! TTLs are enforced by Redis itself (`SET EX`, `EXPIRE`); reads never see
//! an expired key. Nonces are stored as the bare token, the same value the
//! memory backend holds.

use super::{
    nonce_key, ttl_secs, used_key, user_key, NonceStore, RateLimitStore, StoreError, UserStore,
};
use crate::auth::address::EthAddress;
use crate::auth::nonce::generate_nonce;
use crate::clock::Clock;
use crate::models::User;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

/// INCR with the window TTL set on the first hit, in one round trip so a
/// counter can never be left without an expiry.
const RATE_LIMIT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    clock: Arc<dyn Clock>,
}

impl RedisStore {
    pub fn new(client: redis::Client, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Round-trip check used at startup.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut con = self.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }
}

#[async_trait]
impl NonceStore for RedisStore {
    async fn issue(&self, address: &EthAddress, ttl: Duration) -> Result<String, StoreError> {
        let mut con = self.connection().await?;

        let nonce = generate_nonce();
        con.set_ex::<_, _, ()>(nonce_key(address), nonce.as_str(), ttl_secs(ttl))
            .await?;
        Ok(nonce)
    }

    async fn read(&self, address: &EthAddress) -> Result<Option<String>, StoreError> {
        let mut con = self.connection().await?;
        let nonce: Option<String> = con.get(nonce_key(address)).await?;
        Ok(nonce)
    }

    async fn mark_used(
        &self,
        address: &EthAddress,
        nonce: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut con = self.connection().await?;
        con.set_ex::<_, _, ()>(used_key(address, nonce), 1, ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn is_used(&self, address: &EthAddress, nonce: &str) -> Result<bool, StoreError> {
        let mut con = self.connection().await?;
        let exists: bool = con.exists(used_key(address, nonce)).await?;
        Ok(exists)
    }

    async fn invalidate(&self, address: &EthAddress, nonce: &str) -> Result<(), StoreError> {
        let mut con = self.connection().await?;
        con.del::<_, ()>(vec![nonce_key(address), used_key(address, nonce)])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut con = self.connection().await?;
        let count: u64 = redis::Script::new(RATE_LIMIT_SCRIPT)
            .key(key)
            .arg(ttl_secs(window))
            .invoke_async(&mut con)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl UserStore for RedisStore {
    async fn upsert(&self, address: &EthAddress) -> Result<User, StoreError> {
        let mut con = self.connection().await?;
        let key = user_key(address);

        let user = User {
            eth_address: address.clone(),
            created_at: self.clock.now(),
        };
        let json = serde_json::to_string(&user)?;

        // SET NX keeps the original record (and created_at) on repeat sign-ins
        let created: bool = con.set_nx(&key, json).await?;
        if created {
            return Ok(user);
        }

        let existing: Option<String> = con.get(&key).await?;
        match existing {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(StoreError::Unavailable(format!(
                "user record {} vanished during upsert",
                key
            ))),
        }
    }

    async fn get(&self, address: &EthAddress) -> Result<Option<User>, StoreError> {
        let mut con = self.connection().await?;
        let json: Option<String> = con.get(user_key(address)).await?;
        json.map(|data| serde_json::from_str(&data))
            .transpose()
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    const TTL: Duration = Duration::from_secs(60);

    /// Connect to a test Redis, or `None` so the test can skip.
    async fn test_store() -> Option<RedisStore> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let client = match redis::Client::open(redis_url) {
            Ok(c) => c,
            Err(_) => {
                eprintln!("Skipping test: Redis not available");
                return None;
            }
        };

        let store = RedisStore::new(client, Arc::new(SystemClock));
        if store.ping().await.is_err() {
            eprintln!("Skipping test: Redis connection failed");
            return None;
        }
        Some(store)
    }

    fn unique_address() -> EthAddress {
        let suffix = generate_nonce();
        EthAddress::parse(&format!("0x{}", &suffix[..40])).unwrap()
    }

    #[tokio::test]
    async fn test_nonce_lifecycle() {
        let Some(store) = test_store().await else {
            return;
        };
        let address = unique_address();

        let first = store.issue(&address, TTL).await.unwrap();
        let second = store.issue(&address, TTL).await.unwrap();
        assert_eq!(store.read(&address).await.unwrap(), Some(second.clone()));

        // Stored as the bare token, with the nonce TTL
        let mut con = store.connection().await.unwrap();
        let raw: String = con.get(nonce_key(&address)).await.unwrap();
        assert_eq!(raw, second);
        let ttl: i64 = con.ttl(nonce_key(&address)).await.unwrap();
        assert!(ttl > 0 && ttl <= 60);

        store.mark_used(&address, &second, TTL).await.unwrap();
        assert!(store.is_used(&address, &second).await.unwrap());
        assert!(!store.is_used(&address, &first).await.unwrap());

        store.invalidate(&address, &second).await.unwrap();
        store.invalidate(&address, &second).await.unwrap();
        assert_eq!(store.read(&address).await.unwrap(), None);
        assert!(!store.is_used(&address, &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_rate_limit_counter() {
        let Some(store) = test_store().await else {
            return;
        };
        let key = format!("ratelimit:test:{}", generate_nonce());

        for expected in 1..=4 {
            assert_eq!(store.hit(&key, TTL).await.unwrap(), expected);
        }

        let mut con = store.connection().await.unwrap();
        let ttl: i64 = con.ttl(&key).await.unwrap();
        assert!(ttl > 0 && ttl <= 60);
        let _: Result<(), _> = con.del(&key).await;
    }

    #[tokio::test]
    async fn test_user_upsert() {
        let Some(store) = test_store().await else {
            return;
        };
        let address = unique_address();

        let created = store.upsert(&address).await.unwrap();
        let again = store.upsert(&address).await.unwrap();
        assert_eq!(created, again);
        assert_eq!(store.get(&address).await.unwrap(), Some(created));

        let mut con = store.connection().await.unwrap();
        let _: Result<(), _> = con.del(user_key(&address)).await;
    }
}
