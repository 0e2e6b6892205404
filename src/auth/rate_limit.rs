//! Fixed-window rate limiting.

use crate::storage::RateLimitStore;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// At most `max` hits per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn per_minute(max: u64) -> Self {
        Self {
            max,
            window: Duration::from_secs(60),
        }
    }
}

/// A named limiter over a shared counter store.
///
/// The name scopes keys, so two limiters can count the same client
/// independently: `ratelimit:{name}:{key}`.
pub struct RateLimiter {
    name: &'static str,
    policy: RateLimitPolicy,
    counters: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(
        name: &'static str,
        policy: RateLimitPolicy,
        counters: Arc<dyn RateLimitStore>,
    ) -> Self {
        Self {
            name,
            policy,
            counters,
        }
    }

    /// Count a hit and report whether it is within the limit.
    ///
    /// Fails closed: if the counter store errors, the hit is refused.
    pub async fn allow(&self, key: &str) -> bool {
        let scoped = format!("ratelimit:{}:{}", self.name, key);
        match self.counters.hit(&scoped, self.policy.window).await {
            Ok(count) => count <= self.policy.max,
            Err(e) => {
                tracing::error!(limiter = self.name, error = %e, "Rate limit store unavailable, rejecting");
                false
            }
        }
    }
}

/// Stable, non-reversible tag for a client IP in logs.
pub(crate) fn ip_hash(ip: &IpAddr) -> String {
    let mut hasher = DefaultHasher::new();
    ip.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}
