//! Sign-in orchestration.
//!
//! [`Authenticator::authenticate`] runs a fixed sequence of checks and stops
//! at the first failure:
//!
//! 1. auth-attempt rate limit (by client IP)
//! 2. address format
//! 3. stored nonce present
//! 4. nonce not already used
//! 5. mark nonce used
//! 6. parse message
//! 7. domain, URI, chain, app name
//! 8. message nonce equals stored nonce
//! 9. message timestamp fresh and not in the future
//! 10. recovered signer equals claimed address
//! 11. upsert user, invalidate nonce
//!
//! Only steps 5 and 11 write to the nonce and user stores. The nonce is
//! marked used before the signature is checked, so a concurrent duplicate
//! that reads after the mark stops at step 4. Two requests that both pass
//! step 4 before either reaches step 5 are not caught; closing that would
//! take an atomic claim in the store.

use crate::auth::address::EthAddress;
use crate::auth::message::{ChallengeMessage, Expected};
use crate::auth::rate_limit::{ip_hash, RateLimiter};
use crate::auth::verify::recover_address;
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{AuthRequest, User};
use crate::storage::{NonceStore, RateLimitStore, UserStore};
use std::net::IpAddr;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Backends the authenticator runs against.
#[derive(Clone)]
pub struct Stores {
    pub nonces: Arc<dyn NonceStore>,
    pub users: Arc<dyn UserStore>,
    pub counters: Arc<dyn RateLimitStore>,
}

pub struct Authenticator {
    config: AuthConfig,
    nonces: Arc<dyn NonceStore>,
    users: Arc<dyn UserStore>,
    auth_limiter: RateLimiter,
    nonce_limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(config: AuthConfig, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let auth_limiter =
            RateLimiter::new("auth", config.auth_rate_limit, stores.counters.clone());
        let nonce_limiter = RateLimiter::new("nonce", config.nonce_rate_limit, stores.counters);

        Self {
            config,
            nonces: stores.nonces,
            users: stores.users,
            auth_limiter,
            nonce_limiter,
            clock,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issue a nonce for `address`, superseding any earlier one.
    pub async fn request_nonce(&self, client_ip: IpAddr, address: &str) -> Result<String, AuthError> {
        let address = EthAddress::parse(address)?;

        let limit_key = format!("{}:{}", client_ip, address);
        if !self.nonce_limiter.allow(&limit_key).await {
            tracing::warn!(action = "rate_limited", endpoint = "auth/nonce", ip_hash = %ip_hash(&client_ip), "Rate limit exceeded");
            return Err(AuthError::RateLimited);
        }

        let nonce = self.nonces.issue(&address, self.config.nonce_ttl).await?;
        tracing::debug!(action = "nonce_issued", address = %address, "Nonce issued");
        Ok(nonce)
    }

    /// Verify a signed challenge and sign the address in.
    pub async fn authenticate(
        &self,
        client_ip: IpAddr,
        request: &AuthRequest,
    ) -> Result<User, AuthError> {
        let result = self.verify_and_commit(client_ip, request).await;

        match &result {
            Ok(user) => {
                tracing::info!(action = "auth_success", address = %user.eth_address, "User authenticated");
            }
            Err(AuthError::RateLimited) => {
                tracing::warn!(action = "rate_limited", endpoint = "auth/verify", ip_hash = %ip_hash(&client_ip), "Rate limit exceeded");
            }
            Err(e) => {
                tracing::warn!(action = "auth_failed", reason = e.code(), ip_hash = %ip_hash(&client_ip), "Authentication failed");
            }
        }
        result
    }

    async fn verify_and_commit(
        &self,
        client_ip: IpAddr,
        request: &AuthRequest,
    ) -> Result<User, AuthError> {
        if !self.auth_limiter.allow(&client_ip.to_string()).await {
            return Err(AuthError::RateLimited);
        }

        let address = EthAddress::parse(&request.address)?;

        let stored = self
            .nonces
            .read(&address)
            .await?
            .ok_or(AuthError::NonceNotFound)?;
        let stored = Zeroizing::new(stored);

        // A store error here counts as "not used"; the marker below and the
        // invalidation on success still bound how long the nonce is usable.
        let used = match self.nonces.is_used(&address, &stored).await {
            Ok(used) => used,
            Err(e) => {
                tracing::warn!(error = %e, "Used-nonce lookup failed, treating as unused");
                false
            }
        };
        if used {
            return Err(AuthError::NonceAlreadyUsed);
        }

        self.nonces
            .mark_used(&address, &stored, self.config.nonce_ttl)
            .await?;

        let message = ChallengeMessage::parse(&request.message)?;
        message.validate(&self.expected())?;

        if message.nonce != *stored {
            return Err(AuthError::NonceMismatch);
        }

        message.check_freshness(self.clock.now(), self.config.message_max_age)?;

        let signer = recover_address(&request.message, &request.signature)?;
        if signer != address {
            return Err(AuthError::SignatureAddressMismatch);
        }

        let user = self.users.upsert(&address).await?;
        self.nonces.invalidate(&address, &stored).await?;
        Ok(user)
    }

    fn expected(&self) -> Expected<'_> {
        Expected {
            domain: &self.config.domain,
            uri: &self.config.uri,
            app_name: &self.config.app_name,
            chains: &self.config.allowed_chains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::message::Chain;
    use crate::auth::verify::{address_of, sign_personal_message};
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryStore;
    use crate::storage::StoreError;
    use async_trait::async_trait;
    use k256::ecdsa::SigningKey;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    const START: u64 = 1_735_600_000;

    fn client() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    fn config() -> AuthConfig {
        AuthConfig::new("site.test", "http://site.test", "App")
    }

    struct Harness {
        auth: Authenticator,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        key: SigningKey,
        address: EthAddress,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(config())
        }

        fn with_config(config: AuthConfig) -> Self {
            let clock = Arc::new(ManualClock::new(START));
            let store = Arc::new(MemoryStore::new(clock.clone()));
            let stores = Stores {
                nonces: store.clone(),
                users: store.clone(),
                counters: store.clone(),
            };
            Self::build(config, stores, store, clock)
        }

        fn build(
            config: AuthConfig,
            stores: Stores,
            store: Arc<MemoryStore>,
            clock: Arc<ManualClock>,
        ) -> Self {
            let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
            let address = address_of(key.verifying_key());
            Self {
                auth: Authenticator::new(config, stores, clock.clone()),
                store,
                clock,
                key,
                address,
            }
        }

        async fn nonce(&self) -> String {
            self.auth
                .request_nonce(client(), self.address.as_str())
                .await
                .unwrap()
        }

        fn message(&self, domain: &str, nonce: &str) -> String {
            format!("{},http://{},1,App,{},{}", domain, domain, self.clock.now(), nonce)
        }

        fn signed(&self, message: String) -> AuthRequest {
            let signature = sign_personal_message(&self.key, &message).unwrap();
            AuthRequest {
                address: self.address.to_string(),
                message,
                signature,
            }
        }

        async fn submit(&self, request: &AuthRequest) -> Result<User, AuthError> {
            self.auth.authenticate(client(), request).await
        }
    }

    /// Delegates to a memory store, with switchable failures.
    struct FlakyNonces {
        inner: Arc<MemoryStore>,
        fail_issue: AtomicBool,
        fail_is_used: AtomicBool,
        fail_mark: AtomicBool,
        fail_invalidate: AtomicBool,
        used_check_barrier: Option<Barrier>,
    }

    impl FlakyNonces {
        fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                fail_issue: AtomicBool::new(false),
                fail_is_used: AtomicBool::new(false),
                fail_mark: AtomicBool::new(false),
                fail_invalidate: AtomicBool::new(false),
                used_check_barrier: None,
            }
        }

        fn down(flag: &AtomicBool) -> Result<(), StoreError> {
            if flag.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("nonce store down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl NonceStore for FlakyNonces {
        async fn issue(&self, address: &EthAddress, ttl: Duration) -> Result<String, StoreError> {
            Self::down(&self.fail_issue)?;
            self.inner.issue(address, ttl).await
        }

        async fn read(&self, address: &EthAddress) -> Result<Option<String>, StoreError> {
            self.inner.read(address).await
        }

        async fn mark_used(
            &self,
            address: &EthAddress,
            nonce: &str,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            Self::down(&self.fail_mark)?;
            self.inner.mark_used(address, nonce, ttl).await
        }

        async fn is_used(&self, address: &EthAddress, nonce: &str) -> Result<bool, StoreError> {
            let used = self.inner.is_used(address, nonce).await;
            if let Some(barrier) = &self.used_check_barrier {
                barrier.wait().await;
            }
            Self::down(&self.fail_is_used)?;
            used
        }

        async fn invalidate(&self, address: &EthAddress, nonce: &str) -> Result<(), StoreError> {
            Self::down(&self.fail_invalidate)?;
            self.inner.invalidate(address, nonce).await
        }
    }

    fn flaky_harness(configure: impl FnOnce(&mut FlakyNonces)) -> Harness {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let mut nonces = FlakyNonces::new(store.clone());
        configure(&mut nonces);
        let stores = Stores {
            nonces: Arc::new(nonces),
            users: store.clone(),
            counters: store.clone(),
        };
        Harness::build(config(), stores, store, clock)
    }

    // ------------------------------------------------------------------------
    // End-to-end scenarios
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_happy_path() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let request = h.signed(h.message("site.test", &nonce));

        let user = h.submit(&request).await.unwrap();
        assert_eq!(user.eth_address, h.address);
        assert_eq!(user.created_at, START);

        assert_eq!(h.store.get(&h.address).await.unwrap(), Some(user));
        assert_eq!(h.store.read(&h.address).await.unwrap(), None);
        assert!(!h.store.is_used(&h.address, &nonce).await.unwrap());
        assert_eq!(h.store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_checksummed_address_accepted() {
        let h = Harness::new();
        let nonce = h
            .auth
            .request_nonce(client(), &h.address.as_str().to_uppercase().replacen("0X", "0x", 1))
            .await
            .unwrap();
        let mut request = h.signed(h.message("site.test", &nonce));
        request.address = request.address.to_uppercase().replacen("0X", "0x", 1);

        let user = h.submit(&request).await.unwrap();
        assert_eq!(user.eth_address, h.address);
    }

    #[tokio::test]
    async fn test_replay_after_success() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let request = h.signed(h.message("site.test", &nonce));

        h.submit(&request).await.unwrap();
        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::NonceNotFound)
        ));
    }

    #[tokio::test]
    async fn test_expired_nonce() {
        let h = Harness::new();
        let nonce = h.nonce().await;

        h.clock.advance(Duration::from_secs(601));
        let request = h.signed(h.message("site.test", &nonce));

        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::NonceNotFound)
        ));
    }

    #[tokio::test]
    async fn test_domain_mismatch_leaves_nonce_used() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let request = h.signed(h.message("evil.test", &nonce));

        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::DomainMismatch)
        ));

        // Marked before validation, and not restored
        assert!(h.store.is_used(&h.address, &nonce).await.unwrap());
        assert_eq!(h.store.read(&h.address).await.unwrap(), Some(nonce.clone()));

        // Even a correct resubmission is now refused
        let retry = h.signed(h.message("site.test", &nonce));
        assert!(matches!(
            h.submit(&retry).await,
            Err(AuthError::NonceAlreadyUsed)
        ));
        assert_eq!(h.store.get(&h.address).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rate_limit_on_eleventh_attempt() {
        let h = Harness::new();
        let garbage = AuthRequest {
            address: "not-an-address".to_string(),
            message: String::new(),
            signature: String::new(),
        };

        for _ in 0..10 {
            assert!(matches!(
                h.submit(&garbage).await,
                Err(AuthError::InvalidAddress)
            ));
        }

        // A perfectly valid request is still refused
        let nonce = h.nonce().await;
        let request = h.signed(h.message("site.test", &nonce));
        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::RateLimited)
        ));

        // Rejected before the store was touched
        assert!(!h.store.is_used(&h.address, &nonce).await.unwrap());

        h.clock.advance(Duration::from_secs(60));
        let request = h.signed(h.message("site.test", &nonce));
        assert!(h.submit(&request).await.is_ok());
    }

    // ------------------------------------------------------------------------
    // Individual failure reasons
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_invalid_address() {
        let h = Harness::new();
        let mut request = h.signed(h.message("site.test", "n"));
        request.address = "0x1234".to_string();

        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::InvalidAddress)
        ));
    }

    #[tokio::test]
    async fn test_no_nonce_issued() {
        let h = Harness::new();
        let request = h.signed(h.message("site.test", "never-issued"));
        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::NonceNotFound)
        ));
    }

    #[tokio::test]
    async fn test_malformed_message() {
        let h = Harness::new();
        h.nonce().await;
        let request = h.signed("site.test,http://site.test,1,App".to_string());

        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_uri_mismatch() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let message = format!("site.test,https://site.test,1,App,{},{}", START, nonce);

        assert!(matches!(
            h.submit(&h.signed(message)).await,
            Err(AuthError::UriMismatch)
        ));
    }

    #[tokio::test]
    async fn test_unsupported_chain() {
        let mut config = config();
        config.allowed_chains = vec![Chain::Sepolia];
        let h = Harness::with_config(config);
        let nonce = h.nonce().await;

        assert!(matches!(
            h.submit(&h.signed(h.message("site.test", &nonce))).await,
            Err(AuthError::UnsupportedChain(1))
        ));
    }

    #[tokio::test]
    async fn test_app_name_mismatch() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let message = format!("site.test,http://site.test,1,Other,{},{}", START, nonce);

        assert!(matches!(
            h.submit(&h.signed(message)).await,
            Err(AuthError::AppNameMismatch)
        ));
    }

    #[tokio::test]
    async fn test_superseded_nonce_mismatch() {
        let h = Harness::new();
        let first = h.nonce().await;
        let _second = h.nonce().await;

        assert!(matches!(
            h.submit(&h.signed(h.message("site.test", &first))).await,
            Err(AuthError::NonceMismatch)
        ));
    }

    #[tokio::test]
    async fn test_stale_message() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let request = h.signed(h.message("site.test", &nonce));

        h.clock.advance(Duration::from_secs(301));
        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::SignatureExpired)
        ));
    }

    #[tokio::test]
    async fn test_future_timestamp() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let message = format!("site.test,http://site.test,1,App,{},{}", START + 30, nonce);

        assert!(matches!(
            h.submit(&h.signed(message)).await,
            Err(AuthError::InvalidTimestamp)
        ));
    }

    #[tokio::test]
    async fn test_malformed_signature() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let mut request = h.signed(h.message("site.test", &nonce));
        request.signature = "0xdeadbeef".to_string();

        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::SignatureMalformed(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_by_other_key() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let message = h.message("site.test", &nonce);

        let other = SigningKey::from_slice(&[0x07; 32]).unwrap();
        let request = AuthRequest {
            address: h.address.to_string(),
            signature: sign_personal_message(&other, &message).unwrap(),
            message,
        };

        assert!(matches!(
            h.submit(&request).await,
            Err(AuthError::SignatureAddressMismatch)
        ));
        assert_eq!(h.store.get(&h.address).await.unwrap(), None);
    }

    // ------------------------------------------------------------------------
    // Store failures
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_used_lookup_failure_fails_open() {
        let h = flaky_harness(|n| n.fail_is_used = AtomicBool::new(true));
        let nonce = h.nonce().await;

        let user = h.submit(&h.signed(h.message("site.test", &nonce))).await;
        assert!(user.is_ok());
        assert_eq!(h.store.read(&h.address).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_failure_is_persistence_failure() {
        let h = flaky_harness(|n| n.fail_mark = AtomicBool::new(true));
        let nonce = h.nonce().await;

        assert!(matches!(
            h.submit(&h.signed(h.message("site.test", &nonce))).await,
            Err(AuthError::UserPersistenceFailure(_))
        ));
        assert_eq!(h.store.get(&h.address).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_failure_is_persistence_failure() {
        let h = flaky_harness(|n| n.fail_invalidate = AtomicBool::new(true));
        let nonce = h.nonce().await;

        assert!(matches!(
            h.submit(&h.signed(h.message("site.test", &nonce))).await,
            Err(AuthError::UserPersistenceFailure(_))
        ));
        // Still marked, so the same nonce cannot be replayed
        assert!(h.store.is_used(&h.address, &nonce).await.unwrap());
    }

    #[tokio::test]
    async fn test_issue_failure_is_persistence_failure() {
        let h = flaky_harness(|n| n.fail_issue = AtomicBool::new(true));
        assert!(matches!(
            h.auth.request_nonce(client(), h.address.as_str()).await,
            Err(AuthError::UserPersistenceFailure(_))
        ));
    }

    // ------------------------------------------------------------------------
    // Nonce issuance
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_request_nonce_rejects_bad_address_before_store() {
        let h = Harness::new();
        assert!(matches!(
            h.auth.request_nonce(client(), "0xnot-hex").await,
            Err(AuthError::InvalidAddress)
        ));
        assert_eq!(h.store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_request_nonce_rate_limited_per_ip_and_address() {
        let mut config = config();
        config.nonce_rate_limit.max = 2;
        let h = Harness::with_config(config);

        h.nonce().await;
        h.nonce().await;
        assert!(matches!(
            h.auth.request_nonce(client(), h.address.as_str()).await,
            Err(AuthError::RateLimited)
        ));

        // Another address from the same IP has its own budget
        let other = "0x00000000000000000000000000000000000000bb";
        assert!(h.auth.request_nonce(client(), other).await.is_ok());

        // As does the same address from another IP
        let elsewhere: IpAddr = "198.51.100.1".parse().unwrap();
        assert!(h
            .auth
            .request_nonce(elsewhere, h.address.as_str())
            .await
            .is_ok());
    }

    // ------------------------------------------------------------------------
    // Concurrency
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_duplicate_after_mark_is_refused() {
        let h = Harness::new();
        let nonce = h.nonce().await;
        let mut first = h.signed(h.message("site.test", &nonce));
        first.signature = "0x00".to_string();
        let second = h.signed(h.message("site.test", &nonce));

        // The first attempt fails late, after marking
        assert!(h.submit(&first).await.is_err());
        assert!(matches!(
            h.submit(&second).await,
            Err(AuthError::NonceAlreadyUsed)
        ));
    }

    /// Two submissions that both pass the used check before either marks
    /// are both accepted. This is the known read-then-write window.
    #[tokio::test]
    async fn test_race_window_between_check_and_mark_is_not_closed() {
        let h = flaky_harness(|n| n.used_check_barrier = Some(Barrier::new(2)));
        let nonce = h.nonce().await;
        let request = h.signed(h.message("site.test", &nonce));

        let (a, b) = tokio::join!(h.submit(&request), h.submit(&request));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(a.unwrap(), b.unwrap());
    }
}
