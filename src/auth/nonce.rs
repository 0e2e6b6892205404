//! Nonce token generation.

use rand::Rng;

/// Bytes of entropy per nonce.
pub const NONCE_BYTES: usize = 32;

/// Generate a cryptographically random nonce.
///
/// Returns a lowercase hex string (64 characters) from 32 random bytes.
/// Hex keeps the token free of commas so it can sit in a challenge message.
pub fn generate_nonce() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; NONCE_BYTES];
    rng.fill(&mut bytes);
    hex::encode(bytes)
}
