//! Core identifiers shared by every bridge component.
//!
//! Ledger instances are addressed by a small numeric [`LedgerId`] (the same
//! width the relay uses on the wire), accounts and contract instances by a
//! 20-byte [`Address`], and vault positions by an [`AssetId`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::hash::blake3_hash;

/// Identifier of a ledger instance as seen by the relay.
pub type LedgerId = u16;

/// Amount of wrapped units, underlying units, or native gas currency, in the
/// smallest denomination.
pub type Amount = u64;

/// Identifier of an asset registered with the vault service.
pub type AssetId = u64;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Length of an [`Address`] in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// A 20-byte account or contract address.
///
/// Human-readable serializers (JSON) see a `0x`-prefixed hex string; binary
/// serializers (the bincode wire codec) see the raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address. Used as the "no payment token" selector.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Creates an address from raw bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Derives a deterministic address from a label.
    ///
    /// Takes the last 20 bytes of `BLAKE3("omniwrap/address" || 0x00 || label)`.
    /// Devnet accounts, ledger contract instances and vaults all get their
    /// addresses this way so that runs are reproducible.
    pub fn derive(label: &str) -> Self {
        let mut preimage = Vec::with_capacity(label.len() + 18);
        preimage.extend_from_slice(b"omniwrap/address");
        preimage.push(0x00);
        preimage.extend_from_slice(label.as_bytes());
        let digest = blake3_hash(&preimage);

        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[32 - ADDRESS_LENGTH..]);
        Self(bytes)
    }

    /// Returns `true` for the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Returns the `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses a hex address, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; ADDRESS_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}...)", &self.to_hex()[..10])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Address::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; ADDRESS_LENGTH]>::deserialize(deserializer)?;
            Ok(Address(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_and_label_sensitive() {
        assert_eq!(Address::derive("alice"), Address::derive("alice"));
        assert_ne!(Address::derive("alice"), Address::derive("bob"));
        assert!(!Address::derive("alice").is_zero());
    }

    #[test]
    fn hex_accepts_optional_prefix() {
        let addr = Address::derive("vault");
        let hex = addr.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
        assert_eq!(Address::from_hex(&hex[2..]).unwrap(), addr);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(Address::from_hex("0xdeadbeef").is_err());
    }

    #[test]
    fn json_uses_hex_string() {
        let addr = Address::derive("carol");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn bincode_uses_raw_bytes() {
        let addr = Address::derive("dave");
        let bytes = bincode::serialize(&addr).unwrap();
        assert_eq!(bytes.len(), ADDRESS_LENGTH);
    }
}
