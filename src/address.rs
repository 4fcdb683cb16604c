//! Address helpers
//!
//! Addresses are Solana pubkeys. The all-zero pubkey is the "unset" sentinel.

use std::str::FromStr;

use solana_sdk::pubkey::Pubkey;

use crate::error::{Error, Result};

/// The zero address (unset destination)
pub const ZERO: Pubkey = Pubkey::new_from_array([0u8; 32]);

/// Check if an address is the zero sentinel
pub fn is_zero(address: &Pubkey) -> bool {
    *address == ZERO
}

/// Parse a base58 address. An empty string parses as the zero address.
pub fn parse_address(s: &str) -> Result<Pubkey> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(ZERO);
    }
    Pubkey::from_str(s).map_err(|e| Error::Config(format!("Invalid address {}: {}", s, e)))
}

/// Serde adapter storing a pubkey as its base58 string
pub mod as_base58 {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}
