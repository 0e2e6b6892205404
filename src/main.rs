//! Walletgate application entry point.
//!
//! Bootstraps the server:
//! 1. Load configuration from environment
//! 2. Pick the store backend (Redis when `REDIS_URL` is set, memory otherwise)
//! 3. Build the authenticator and API router
//! 4. Apply CORS and security headers middleware
//! 5. Start Axum server
//!
//! Also supports a `sign` subcommand for producing test signatures.

use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use walletgate::{
    auth::verify::{address_of, sign_personal_message, signing_key_from_hex},
    auth::{Authenticator, Stores},
    clock::{Clock, SystemClock},
    config::Config,
    middleware::security_headers,
    routes::{self, AppState},
    storage::{memory::MemoryStore, redis::RedisStore},
};

/// Sign `message` as an Ethereum personal message.
///
/// Returns the signer address and the 65-byte signature, both hex.
fn sign(private_key: &str, message: &str) -> Result<(String, String), String> {
    let key = signing_key_from_hex(private_key).map_err(|_| "Invalid private key".to_string())?;
    let signature =
        sign_personal_message(&key, message).map_err(|e| format!("Signing failed: {}", e))?;
    Ok((address_of(key.verifying_key()).to_string(), signature))
}

fn print_sign_usage() {
    eprintln!("Usage: walletgate sign <private-key-hex> <message>");
    eprintln!();
    eprintln!("Sign a challenge message with a secp256k1 key, for local testing.");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  walletgate sign 0x4c08...  'example.com,https://example.com,1,App,1735600000,<nonce>'");
}

async fn build_stores(config: &Config, clock: Arc<dyn Clock>) -> Stores {
    match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).expect("Invalid Redis URL");
            let store = Arc::new(RedisStore::new(client, clock));
            store.ping().await.expect("Failed to connect to Redis");
            tracing::info!("Using Redis store");
            Stores {
                nonces: store.clone(),
                users: store.clone(),
                counters: store,
            }
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-memory store (single instance only)");
            let store = Arc::new(MemoryStore::new(clock));
            Stores {
                nonces: store.clone(),
                users: store.clone(),
                counters: store,
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Check for sign subcommand
    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && args[1] == "sign" {
        if args.len() != 4 {
            print_sign_usage();
            std::process::exit(1);
        }

        match sign(&args[2], &args[3]) {
            Ok((address, signature)) => {
                println!("address:   {}", address);
                println!("signature: {}", signature);
            }
            Err(e) => {
                eprintln!("Error signing message: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().expect("Failed to load config");
    tracing::info!("Starting walletgate on {}", config.bind_addr);
    tracing::debug!(config = ?config, "Loaded configuration");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = build_stores(&config, clock.clone()).await;

    let chains: Vec<&str> = config.auth.allowed_chains.iter().map(|c| c.name()).collect();
    tracing::info!(domain = %config.auth.domain, chains = ?chains, "Accepting sign-in");

    let state = AppState {
        auth: Arc::new(Authenticator::new(config.auth.clone(), stores, clock)),
    };

    // Explicit CORS: deny all cross-origin requests (single-origin deployment).
    let cors = CorsLayer::new();

    let app = routes::api_router()
        .layer(cors)
        .layer(axum::middleware::from_fn(security_headers))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!("Listening on {}", config.bind_addr);

    // with_connect_info is required for the ConnectInfo<SocketAddr> extractors
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
