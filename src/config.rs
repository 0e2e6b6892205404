use crate::auth::message::Chain;
use crate::auth::rate_limit::RateLimitPolicy;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Settings the authenticator needs. Passed in explicitly so tests can vary
/// TTLs, chains and limits per case.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    // Expected challenge fields
    pub domain: String,
    pub uri: String,
    pub app_name: String,
    pub allowed_chains: Vec<Chain>,

    // Lifetimes
    pub nonce_ttl: Duration,
    pub message_max_age: Duration,

    // Rate limiting
    pub auth_rate_limit: RateLimitPolicy,
    pub nonce_rate_limit: RateLimitPolicy,
}

impl AuthConfig {
    pub const DEFAULT_CHAINS: [Chain; 3] = [Chain::Mainnet, Chain::Sepolia, Chain::Holesky];

    /// Defaults: 10 minute nonces, 5 minute messages, 10 sign-in attempts
    /// and 30 nonce requests per minute.
    pub fn new(domain: &str, uri: &str, app_name: &str) -> Self {
        Self {
            domain: domain.to_string(),
            uri: uri.to_string(),
            app_name: app_name.to_string(),
            allowed_chains: Self::DEFAULT_CHAINS.to_vec(),
            nonce_ttl: Duration::from_secs(600),
            message_max_age: Duration::from_secs(300),
            auth_rate_limit: RateLimitPolicy::per_minute(10),
            nonce_rate_limit: RateLimitPolicy::per_minute(30),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_addr: SocketAddr,

    // Redis (in-memory store when unset)
    pub redis_url: Option<String>,

    pub auth: AuthConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("auth", &self.auth)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Attempt to load .env file, but don't fail if it doesn't exist
        // (env vars may be set directly in production)
        let _ = dotenvy::dotenv();

        // Server
        let bind_addr_str = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;

        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        // Challenge fields end up inside a comma-separated message
        let domain = required_field("AUTH_DOMAIN")?;
        let uri = required_field("AUTH_URI")?;
        let app_name = required_field("APP_NAME")?;

        let allowed_chains = match env::var("ALLOWED_CHAIN_IDS") {
            Ok(raw) => parse_chain_ids(&raw)?,
            Err(_) => AuthConfig::DEFAULT_CHAINS.to_vec(),
        };

        // Lifetimes
        let nonce_ttl_secs = parse_env_or_default("NONCE_TTL_SECS", 600u64)?;
        let message_max_age_secs = parse_env_or_default("MESSAGE_MAX_AGE_SECS", 300u64)?;
        if nonce_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "NONCE_TTL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        // Rate limiting
        let auth_rate_limit = RateLimitPolicy {
            max: parse_env_or_default("RATE_LIMIT_AUTH_MAX", 10)?,
            window: Duration::from_secs(positive("RATE_LIMIT_AUTH_WINDOW_SECS", 60)?),
        };
        let nonce_rate_limit = RateLimitPolicy {
            max: parse_env_or_default("RATE_LIMIT_NONCE_MAX", 30)?,
            window: Duration::from_secs(positive("RATE_LIMIT_NONCE_WINDOW_SECS", 60)?),
        };

        Ok(Config {
            bind_addr,
            redis_url,
            auth: AuthConfig {
                domain,
                uri,
                app_name,
                allowed_chains,
                nonce_ttl: Duration::from_secs(nonce_ttl_secs),
                message_max_age: Duration::from_secs(message_max_age_secs),
                auth_rate_limit,
                nonce_rate_limit,
            },
        })
    }
}

/// A non-empty value with no commas.
fn required_field(key: &str) -> Result<String, ConfigError> {
    let value = env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))?;

    if value.is_empty() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "cannot be empty".to_string(),
        ));
    }
    if value.contains(',') {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "may not contain commas".to_string(),
        ));
    }
    Ok(value)
}

/// Comma-separated chain IDs, each one a known network.
fn parse_chain_ids(raw: &str) -> Result<Vec<Chain>, ConfigError> {
    let mut chains = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = part.parse::<u64>().map_err(|e| {
            ConfigError::ParseError("ALLOWED_CHAIN_IDS".to_string(), format!("{}: {}", e, part))
        })?;
        let chain = Chain::from_id(id).ok_or_else(|| {
            ConfigError::InvalidValue(
                "ALLOWED_CHAIN_IDS".to_string(),
                format!("unknown chain id {}", id),
            )
        })?;
        if !chains.contains(&chain) {
            chains.push(chain);
        }
    }

    if chains.is_empty() {
        return Err(ConfigError::InvalidValue(
            "ALLOWED_CHAIN_IDS".to_string(),
            "must list at least one chain".to_string(),
        ));
    }
    Ok(chains)
}

fn positive(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = parse_env_or_default(key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}
