//! Ethereum sign-in: challenge messages, signature recovery, nonces and rate
//! limiting, tied together by [`Authenticator`].

pub mod address;
pub mod message;
pub mod nonce;
pub mod rate_limit;
pub mod service;
pub mod verify;

pub use address::EthAddress;
pub use message::{Chain, ChallengeMessage};
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use service::{Authenticator, Stores};
pub use verify::recover_address;
