//! # Bridge Wire Payloads
//!
//! Every packet the bridge hands to the relay carries exactly one
//! [`BridgePayload`]. The enum is the whole vocabulary of the protocol;
//! the receiving side matches on it exhaustively.
//!
//! ## Wire Format
//!
//! ```text
//!   +---------+------------------------------------------+
//!   | version | bincode(BridgePayload), fixint, no trail |
//!   |  1 byte |            <= MAX_PAYLOAD_BYTES           |
//!   +---------+------------------------------------------+
//! ```

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::{MAX_PAYLOAD_BYTES, WIRE_VERSION};
use crate::types::{Address, Amount, AssetId};

/// Errors produced while encoding or decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Zero-length payload.
    #[error("empty payload")]
    Empty,

    /// Payload exceeds [`MAX_PAYLOAD_BYTES`].
    #[error("payload too large: {size} bytes (max {max})")]
    TooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// Leading version byte is not [`WIRE_VERSION`].
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    /// The body is not a valid `BridgePayload`.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Discriminant of a [`BridgePayload`], used in events and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Plain cross-ledger transfer.
    Transfer,
    /// Transfer followed by a vault deposit on the destination.
    VaultDeposit,
    /// Vault withdrawal on the destination followed by a return transfer.
    VaultWithdraw,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Transfer => write!(f, "Transfer"),
            MessageKind::VaultDeposit => write!(f, "VaultDeposit"),
            MessageKind::VaultWithdraw => write!(f, "VaultWithdraw"),
        }
    }
}

/// The payload of a cross-ledger bridge message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgePayload {
    /// Credit `amount` wrapped units to `recipient` on the destination.
    Transfer {
        /// Account credited on the destination ledger.
        recipient: Address,
        /// Wrapped units burned on the source.
        amount: Amount,
    },
    /// Credit the destination's holding account, then deposit into the
    /// vault on behalf of `recipient`.
    VaultDeposit {
        /// Original caller; the vault position belongs to them.
        recipient: Address,
        /// Wrapped units burned on the source.
        amount: Amount,
        /// Vault asset identifier.
        asset_id: AssetId,
        /// Hold the position under the destination instance's own account.
        use_strategy: bool,
    },
    /// Withdraw from the destination vault and send the units back to
    /// `owner` on the source ledger.
    VaultWithdraw {
        /// Account that made the original deposit.
        owner: Address,
        /// Amount to withdraw.
        amount: Amount,
        /// Vault asset identifier.
        asset_id: AssetId,
        /// Withdraw from the destination instance's own position.
        use_strategy: bool,
    },
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_PAYLOAD_BYTES as u64)
        .reject_trailing_bytes()
}

impl BridgePayload {
    /// Returns the payload's kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            BridgePayload::Transfer { .. } => MessageKind::Transfer,
            BridgePayload::VaultDeposit { .. } => MessageKind::VaultDeposit,
            BridgePayload::VaultWithdraw { .. } => MessageKind::VaultWithdraw,
        }
    }

    /// Returns the wrapped amount the payload moves.
    pub fn amount(&self) -> Amount {
        match self {
            BridgePayload::Transfer { amount, .. }
            | BridgePayload::VaultDeposit { amount, .. }
            | BridgePayload::VaultWithdraw { amount, .. } => *amount,
        }
    }

    /// Encodes the payload into its versioned wire form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = codec()
            .serialize(self)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(WIRE_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes a versioned wire payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (version, body) = bytes.split_first().ok_or(CodecError::Empty)?;
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(CodecError::TooLarge {
                size: bytes.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        if *version != WIRE_VERSION {
            return Err(CodecError::UnsupportedVersion(*version));
        }
        codec()
            .deserialize(body)
            .map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> BridgePayload {
        BridgePayload::VaultDeposit {
            recipient: Address::derive("alice"),
            amount: 1_000,
            asset_id: 1,
            use_strategy: true,
        }
    }

    #[test]
    fn encoded_payload_starts_with_version() {
        let bytes = deposit().encode().unwrap();
        assert_eq!(bytes[0], WIRE_VERSION);
        assert_eq!(BridgePayload::decode(&bytes).unwrap(), deposit());
    }

    #[test]
    fn kind_and_amount_follow_variant() {
        let withdraw = BridgePayload::VaultWithdraw {
            owner: Address::derive("bob"),
            amount: 77,
            asset_id: 3,
            use_strategy: false,
        };
        assert_eq!(withdraw.kind(), MessageKind::VaultWithdraw);
        assert_eq!(withdraw.amount(), 77);
        assert_eq!(deposit().kind(), MessageKind::VaultDeposit);
    }

    #[test]
    fn empty_payload_rejected() {
        assert_eq!(BridgePayload::decode(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = deposit().encode().unwrap();
        bytes[0] = WIRE_VERSION + 1;
        assert_eq!(
            BridgePayload::decode(&bytes),
            Err(CodecError::UnsupportedVersion(WIRE_VERSION + 1))
        );
    }

    #[test]
    fn truncated_body_is_malformed() {
        let bytes = deposit().encode().unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            BridgePayload::decode(cut),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = deposit().encode().unwrap();
        bytes.push(0xFF);
        assert!(matches!(
            BridgePayload::decode(&bytes),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut bytes = vec![WIRE_VERSION];
        bytes.resize(MAX_PAYLOAD_BYTES + 1, 0);
        assert!(matches!(
            BridgePayload::decode(&bytes),
            Err(CodecError::TooLarge { .. })
        ));
    }
}
