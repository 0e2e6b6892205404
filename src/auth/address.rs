//! Normalized Ethereum addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

const ADDRESS_HEX_LEN: usize = 40;

/// A `0x`-prefixed, 40-hex-digit, lowercase Ethereum address.
///
/// Mixed-case (EIP-55 checksummed) input is accepted and lowercased; the
/// checksum itself is not verified since the signature proves ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EthAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid Ethereum address: expected 0x followed by 40 hex characters")]
pub struct InvalidAddress;

impl EthAddress {
    /// Lowercase the input and check it against `^0x[0-9a-f]{40}$`.
    pub fn parse(raw: &str) -> Result<Self, InvalidAddress> {
        let normalized = raw.to_ascii_lowercase();
        let hex_part = normalized.strip_prefix("0x").ok_or(InvalidAddress)?;

        if hex_part.len() != ADDRESS_HEX_LEN
            || !hex_part
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(InvalidAddress);
        }

        Ok(EthAddress(normalized))
    }

    /// Address from the 20 raw bytes produced by key derivation.
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        EthAddress(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EthAddress {
    type Error = InvalidAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EthAddress::parse(&value)
    }
}

impl From<EthAddress> for String {
    fn from(address: EthAddress) -> Self {
        address.0
    }
}
