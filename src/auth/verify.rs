//! secp256k1 signature recovery for Ethereum personal messages.
//!
//! Signatures are the 65-byte `r || s || v` form wallets return from
//! `personal_sign`, hex-encoded with an optional `0x` prefix. `v` may be
//! 0/1 or the legacy 27/28.

use crate::auth::address::EthAddress;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

const SIGNATURE_LEN: usize = 65;
const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not valid hex")]
    InvalidHex,

    #[error("invalid signature length: expected 65 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("invalid r/s encoding")]
    InvalidScalars,

    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// Keccak-256 (the pre-standard SHA-3 Ethereum uses).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash of `"\x19Ethereum Signed Message:\n" + len(message) + message`.
///
/// The length is the decimal byte length, not the character count.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Address of a public key: low 20 bytes of keccak256 of the uncompressed
/// point without its 0x04 tag.
pub fn address_of(key: &VerifyingKey) -> EthAddress {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    EthAddress::from_bytes(&address)
}

/// Decode a hex `r || s || v` signature.
///
/// High-S signatures are folded into the low half of the curve order with
/// the recovery id flipped to match, so both forms recover the same key.
pub fn decode_signature(signature: &str) -> Result<(Signature, RecoveryId), SignatureError> {
    let hex_part = signature
        .strip_prefix("0x")
        .or_else(|| signature.strip_prefix("0X"))
        .unwrap_or(signature);
    let bytes = hex::decode(hex_part).map_err(|_| SignatureError::InvalidHex)?;

    if bytes.len() != SIGNATURE_LEN {
        return Err(SignatureError::InvalidLength(bytes.len()));
    }

    let v = bytes[64];
    let recovery_byte = match v {
        0 | 27 => 0,
        1 | 28 => 1,
        other => return Err(SignatureError::InvalidRecoveryId(other)),
    };
    let recovery_id =
        RecoveryId::from_byte(recovery_byte).ok_or(SignatureError::InvalidRecoveryId(v))?;

    let signature =
        Signature::from_slice(&bytes[..64]).map_err(|_| SignatureError::InvalidScalars)?;

    match signature.normalize_s() {
        Some(low_s) => Ok((
            low_s,
            RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
        )),
        None => Ok((signature, recovery_id)),
    }
}

/// Recover the address that produced `signature` over `message`.
///
/// This is the expensive step of authentication and should run only after
/// every cheaper check has passed.
pub fn recover_address(message: &str, signature: &str) -> Result<EthAddress, SignatureError> {
    let (signature, recovery_id) = decode_signature(signature)?;
    let hash = personal_message_hash(message.as_bytes());

    let key = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id)
        .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(address_of(&key))
}

/// Sign `message` the way a wallet's `personal_sign` does.
///
/// Returns `0x`-prefixed hex with `v` in 27/28 form.
pub fn sign_personal_message(
    key: &SigningKey,
    message: &str,
) -> Result<String, k256::ecdsa::Error> {
    let hash = personal_message_hash(message.as_bytes());
    let (signature, recovery_id) = key.sign_prehash_recoverable(&hash)?;

    let mut bytes = Vec::with_capacity(SIGNATURE_LEN);
    bytes.extend_from_slice(&signature.to_bytes());
    bytes.push(27 + recovery_id.to_byte());
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Parse a hex-encoded 32-byte secp256k1 private key.
pub fn signing_key_from_hex(private_key: &str) -> Result<SigningKey, k256::ecdsa::Error> {
    let hex_part = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = Zeroizing::new(hex::decode(hex_part).map_err(|_| k256::ecdsa::Error::new())?);
    SigningKey::from_slice(&bytes)
}
