//! Relay adapter parameters.
//!
//! Adapter parameters are opaque to the bridge: callers build them, the
//! bridge forwards them, and the relay interprets them. The layout is the
//! packed big-endian form used by LayerZero-style endpoints:
//!
//! ```text
//!   v1: | u16 type = 1 | u256 gas_limit |
//!   v2: | u16 type = 2 | u256 gas_limit | u256 airdrop_amount | address(20) recipient |
//! ```
//!
//! An empty byte string means "default gas, no airdrop".

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::RelayError;
use crate::config::{ADAPTER_PARAMS_V1, ADAPTER_PARAMS_V2};
use crate::types::{Address, Amount, ADDRESS_LENGTH};

const WORD: usize = 32;
const V1_LEN: usize = 2 + WORD;
const V2_LEN: usize = 2 + WORD + WORD + ADDRESS_LENGTH;

/// Decoded adapter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterParams {
    /// Use the relay's default destination gas limit.
    Default,
    /// Request a specific destination gas limit.
    Gas {
        /// Destination gas limit.
        gas_limit: u64,
    },
    /// Request a gas limit plus native currency delivered to `recipient` on
    /// the destination before execution.
    Airdrop {
        /// Destination gas limit.
        gas_limit: u64,
        /// Native units to deliver.
        amount: Amount,
        /// Account that receives them.
        recipient: Address,
    },
}

fn put_word(buf: &mut BytesMut, value: u64) {
    buf.put_bytes(0, WORD - 8);
    buf.put_u64(value);
}

fn get_word(buf: &mut &[u8]) -> Result<u64, RelayError> {
    let mut word = [0u8; WORD];
    buf.copy_to_slice(&mut word);
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(RelayError::MalformedAdapterParams(
            "u256 field exceeds 64 bits".into(),
        ));
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(low))
}

impl AdapterParams {
    /// Packs the parameters into their wire form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            AdapterParams::Default => Vec::new(),
            AdapterParams::Gas { gas_limit } => {
                let mut buf = BytesMut::with_capacity(V1_LEN);
                buf.put_u16(ADAPTER_PARAMS_V1);
                put_word(&mut buf, *gas_limit);
                buf.to_vec()
            }
            AdapterParams::Airdrop {
                gas_limit,
                amount,
                recipient,
            } => {
                let mut buf = BytesMut::with_capacity(V2_LEN);
                buf.put_u16(ADAPTER_PARAMS_V2);
                put_word(&mut buf, *gas_limit);
                put_word(&mut buf, *amount);
                buf.put_slice(recipient.as_bytes());
                buf.to_vec()
            }
        }
    }

    /// Unpacks wire-form parameters.
    pub fn decode(raw: &[u8]) -> Result<Self, RelayError> {
        if raw.is_empty() {
            return Ok(AdapterParams::Default);
        }
        if raw.len() < 2 {
            return Err(RelayError::MalformedAdapterParams(format!(
                "{} bytes is shorter than the type tag",
                raw.len()
            )));
        }

        let mut buf = raw;
        let version = buf.get_u16();
        match version {
            ADAPTER_PARAMS_V1 => {
                if raw.len() != V1_LEN {
                    return Err(RelayError::MalformedAdapterParams(format!(
                        "v1 expects {} bytes, got {}",
                        V1_LEN,
                        raw.len()
                    )));
                }
                let gas_limit = get_word(&mut buf)?;
                Ok(AdapterParams::Gas { gas_limit })
            }
            ADAPTER_PARAMS_V2 => {
                if raw.len() != V2_LEN {
                    return Err(RelayError::MalformedAdapterParams(format!(
                        "v2 expects {} bytes, got {}",
                        V2_LEN,
                        raw.len()
                    )));
                }
                let gas_limit = get_word(&mut buf)?;
                let amount = get_word(&mut buf)?;
                let mut addr = [0u8; ADDRESS_LENGTH];
                buf.copy_to_slice(&mut addr);
                Ok(AdapterParams::Airdrop {
                    gas_limit,
                    amount,
                    recipient: Address::from_bytes(addr),
                })
            }
            other => Err(RelayError::UnsupportedAdapterParams(other)),
        }
    }

    /// Destination gas limit, falling back to `default` for [`AdapterParams::Default`].
    pub fn gas_limit(&self, default: u64) -> u64 {
        match self {
            AdapterParams::Default => default,
            AdapterParams::Gas { gas_limit } | AdapterParams::Airdrop { gas_limit, .. } => {
                *gas_limit
            }
        }
    }

    /// Requested airdrop, if any.
    pub fn airdrop(&self) -> Option<(Address, Amount)> {
        match self {
            AdapterParams::Airdrop {
                amount, recipient, ..
            } if *amount > 0 => Some((*recipient, *amount)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_mean_default() {
        assert_eq!(AdapterParams::decode(&[]).unwrap(), AdapterParams::Default);
        assert!(AdapterParams::Default.encode().is_empty());
        assert_eq!(AdapterParams::Default.gas_limit(123), 123);
    }

    #[test]
    fn v1_layout_is_type_then_word() {
        let bytes = AdapterParams::Gas { gas_limit: 800_000 }.encode();
        assert_eq!(bytes.len(), V1_LEN);
        assert_eq!(&bytes[..2], &[0, 1]);
        assert_eq!(
            AdapterParams::decode(&bytes).unwrap().gas_limit(0),
            800_000
        );
    }

    #[test]
    fn v2_carries_airdrop() {
        let recipient = Address::derive("peer-bridge");
        let params = AdapterParams::Airdrop {
            gas_limit: 800_000,
            amount: 15_000,
            recipient,
        };
        let bytes = params.encode();
        assert_eq!(bytes.len(), V2_LEN);
        let decoded = AdapterParams::decode(&bytes).unwrap();
        assert_eq!(decoded.airdrop(), Some((recipient, 15_000)));
    }

    #[test]
    fn zero_airdrop_is_no_airdrop() {
        let params = AdapterParams::Airdrop {
            gas_limit: 1,
            amount: 0,
            recipient: Address::derive("x"),
        };
        assert_eq!(params.airdrop(), None);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut bytes = AdapterParams::Gas { gas_limit: 1 }.encode();
        bytes[1] = 7;
        assert!(matches!(
            AdapterParams::decode(&bytes),
            Err(RelayError::UnsupportedAdapterParams(7))
        ));
    }

    #[test]
    fn wrong_length_rejected() {
        let bytes = AdapterParams::Gas { gas_limit: 1 }.encode();
        assert!(matches!(
            AdapterParams::decode(&bytes[..10]),
            Err(RelayError::MalformedAdapterParams(_))
        ));
        assert!(AdapterParams::decode(&[1]).is_err());
    }

    #[test]
    fn oversized_word_rejected() {
        let mut bytes = AdapterParams::Gas { gas_limit: 1 }.encode();
        bytes[2] = 1;
        assert!(matches!(
            AdapterParams::decode(&bytes),
            Err(RelayError::MalformedAdapterParams(_))
        ));
    }
}
