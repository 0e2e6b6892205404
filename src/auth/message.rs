//! Challenge message codec.
//!
//! The client signs a flat, comma-separated string:
//!
//! ```text
//! <domain>,<uri>,<chainId>,<appName>,<unixTimestamp>,<nonce>
//! ```
//!
//! There is no escaping. A field that contains a comma changes the field
//! count and the message is rejected as malformed.
//!
//! Parsing and field validation are pure. Freshness needs the current time
//! and is checked separately by [`ChallengeMessage::check_freshness`].

use std::fmt;
use std::time::Duration;

const FIELD_COUNT: usize = 6;

/// Networks whose signatures may be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Mainnet,
    Sepolia,
    Holesky,
    Hoodi,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Mainnet, Chain::Sepolia, Chain::Holesky, Chain::Hoodi];

    pub fn id(self) -> u64 {
        match self {
            Chain::Mainnet => 1,
            Chain::Sepolia => 11_155_111,
            Chain::Holesky => 17_000,
            Chain::Hoodi => 560_048,
        }
    }

    pub fn from_id(id: u64) -> Option<Chain> {
        Chain::ALL.into_iter().find(|c| c.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Chain::Mainnet => "mainnet",
            Chain::Sepolia => "sepolia",
            Chain::Holesky => "holesky",
            Chain::Hoodi => "hoodi",
        }
    }
}

/// A parsed challenge. Lives only for the duration of one verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub domain: String,
    pub uri: String,
    pub chain_id: u64,
    pub app_name: String,
    pub issued_at: i64,
    pub nonce: String,
}

/// Structural problems found while splitting the raw string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("expected 6 comma-separated fields, got {0}")]
    FieldCount(usize),

    #[error("chain id is not an integer")]
    InvalidChainId,

    #[error("timestamp is not an integer")]
    InvalidTimestamp,
}

/// A well-formed message that does not match what this server expects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("domain does not match")]
    DomainMismatch,

    #[error("URI does not match")]
    UriMismatch,

    #[error("chain {0} is not supported")]
    UnsupportedChain(u64),

    #[error("application name does not match")]
    AppNameMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreshnessError {
    #[error("message was signed more than {max_age_secs}s ago")]
    Expired { max_age_secs: u64 },

    #[error("message timestamp is in the future")]
    FromFuture,
}

/// Values a message must carry to be accepted here.
#[derive(Debug, Clone, Copy)]
pub struct Expected<'a> {
    pub domain: &'a str,
    pub uri: &'a str,
    pub app_name: &'a str,
    pub chains: &'a [Chain],
}

impl ChallengeMessage {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = raw.split(',').collect();
        if fields.len() != FIELD_COUNT {
            return Err(ParseError::FieldCount(fields.len()));
        }

        let chain_id = fields[2]
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidChainId)?;
        let issued_at = fields[4]
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidTimestamp)?;

        Ok(ChallengeMessage {
            domain: fields[0].to_string(),
            uri: fields[1].to_string(),
            chain_id,
            app_name: fields[3].to_string(),
            issued_at,
            nonce: fields[5].to_string(),
        })
    }

    /// Check domain, URI, chain and app name, in that order.
    pub fn validate(&self, expected: &Expected<'_>) -> Result<(), ValidationError> {
        if self.domain != expected.domain {
            return Err(ValidationError::DomainMismatch);
        }
        if self.uri != expected.uri {
            return Err(ValidationError::UriMismatch);
        }
        if !expected.chains.iter().any(|c| c.id() == self.chain_id) {
            return Err(ValidationError::UnsupportedChain(self.chain_id));
        }
        if self.app_name != expected.app_name {
            return Err(ValidationError::AppNameMismatch);
        }
        Ok(())
    }

    /// The message must not be dated after `now` nor older than `max_age`.
    pub fn check_freshness(&self, now: u64, max_age: Duration) -> Result<(), FreshnessError> {
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        if self.issued_at > now {
            return Err(FreshnessError::FromFuture);
        }

        let max_age_secs = max_age.as_secs();
        let age = now.saturating_sub(self.issued_at);
        if age as u64 > max_age_secs {
            return Err(FreshnessError::Expired { max_age_secs });
        }
        Ok(())
    }
}

impl fmt::Display for ChallengeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.domain, self.uri, self.chain_id, self.app_name, self.issued_at, self.nonce
        )
    }
}
