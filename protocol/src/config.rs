//! # Protocol Configuration & Constants
//!
//! Every magic number the bridge depends on lives here: the fee
//! denominator, the relay fee schedule, adapter-parameter versions and the
//! devnet defaults. Values that an operator may want to change per run are
//! carried by [`DevnetConfig`], which loads from JSON.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Amount, LedgerId};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version byte prefixed to every encoded bridge payload. Bump on any
/// change to [`crate::message::BridgePayload`]'s layout.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on an encoded payload. Anything larger is rejected before
/// bincode gets a chance to allocate for it.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024;

/// Refused packets the relay keeps per path for redelivery.
pub const MAX_STORED_PACKETS_PER_PATH: usize = 64;

// ---------------------------------------------------------------------------
// Fee Parameters
// ---------------------------------------------------------------------------

/// Basis-point denominator for the wrap fee. 10_000 bps = 100%.
pub const FEE_DENOMINATOR_BPS: u64 = 10_000;

/// Wrap fee charged when no rate is configured: 50 bps = 0.5%.
pub const DEFAULT_FEE_RATE_BPS: u64 = 50;

/// Decimal places of the devnet underlying asset. The wrapped
/// representation always mirrors the underlying's decimals.
pub const DEFAULT_DECIMALS: u8 = 18;

// ---------------------------------------------------------------------------
// Relay Parameters
// ---------------------------------------------------------------------------

/// Adapter-parameter layout carrying only a destination gas limit.
pub const ADAPTER_PARAMS_V1: u16 = 1;

/// Adapter-parameter layout carrying a gas limit plus a native-currency
/// airdrop to a destination account.
pub const ADAPTER_PARAMS_V2: u16 = 2;

/// Destination gas limit assumed when the caller supplies empty adapter
/// parameters.
pub const DEFAULT_DESTINATION_GAS_LIMIT: u64 = 200_000;

/// Flat relay fee per dispatched packet, in native units.
pub const RELAY_BASE_FEE: Amount = 10_000;

/// Relay fee per payload byte, in native units.
pub const RELAY_FEE_PER_BYTE: Amount = 16;

/// Price of one unit of destination gas, in native units.
pub const RELAY_GAS_PRICE: Amount = 1;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port for the devnet node.
pub const DEFAULT_API_PORT: u16 = 9841;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// How often the node's router redelivers packets the relay has stored.
pub const STORED_RETRY_INTERVAL_MS: u64 = 2_000;

/// Origin ledger id used by the built-in devnet.
pub const DEVNET_ORIGIN_LEDGER: LedgerId = 1;

/// Peer ledger id used by the built-in devnet.
pub const DEVNET_PEER_LEDGER: LedgerId = 10;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`DevnetConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The config parsed but describes an impossible deployment.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Relay Fee Schedule
// ---------------------------------------------------------------------------

/// Fee schedule applied by the relay when quoting a dispatch.
///
/// `quote = base_fee + fee_per_byte * payload_len + gas_price * gas_limit
/// + airdrop_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayFeeSchedule {
    /// Flat fee per packet.
    pub base_fee: Amount,
    /// Fee per payload byte.
    pub fee_per_byte: Amount,
    /// Price per unit of destination gas.
    pub gas_price: Amount,
    /// Gas limit used when adapter parameters are empty.
    pub default_gas_limit: u64,
}

impl Default for RelayFeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: RELAY_BASE_FEE,
            fee_per_byte: RELAY_FEE_PER_BYTE,
            gas_price: RELAY_GAS_PRICE,
            default_gas_limit: DEFAULT_DESTINATION_GAS_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Devnet Configuration
// ---------------------------------------------------------------------------

/// One ledger instance in a devnet deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSpec {
    /// Relay-level ledger identifier.
    pub ledger_id: LedgerId,
    /// Human label; also the seed for the instance's contract address.
    pub label: String,
    /// Whether the underlying asset is native to this ledger.
    #[serde(default)]
    pub origin: bool,
    /// Initial wrap fee rate. Ignored on non-origin ledgers.
    #[serde(default = "default_fee_rate")]
    pub fee_rate_bps: u64,
}

fn default_fee_rate() -> u64 {
    DEFAULT_FEE_RATE_BPS
}

/// A complete devnet deployment: ledgers plus relay pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevnetConfig {
    /// Ledger instances to spin up. Exactly one must be the origin.
    pub ledgers: Vec<LedgerSpec>,
    /// Fee schedule for the in-process relay.
    #[serde(default)]
    pub relay: RelayFeeSchedule,
    /// Decimals of the underlying asset.
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

fn default_decimals() -> u8 {
    DEFAULT_DECIMALS
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            ledgers: vec![
                LedgerSpec {
                    ledger_id: DEVNET_ORIGIN_LEDGER,
                    label: "origin".into(),
                    origin: true,
                    fee_rate_bps: DEFAULT_FEE_RATE_BPS,
                },
                LedgerSpec {
                    ledger_id: DEVNET_PEER_LEDGER,
                    label: "peer".into(),
                    origin: false,
                    fee_rate_bps: DEFAULT_FEE_RATE_BPS,
                },
            ],
            relay: RelayFeeSchedule::default(),
            decimals: DEFAULT_DECIMALS,
        }
    }
}

impl DevnetConfig {
    /// Reads and validates a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: DevnetConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the deployment for structural problems.
    ///
    /// Rules: at least one ledger, unique ledger ids and labels, exactly
    /// one origin, every fee rate within the denominator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledgers.is_empty() {
            return Err(ConfigError::Invalid("no ledgers configured".into()));
        }

        let mut ids = HashSet::new();
        let mut labels = HashSet::new();
        for ledger in &self.ledgers {
            if !ids.insert(ledger.ledger_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ledger id {}",
                    ledger.ledger_id
                )));
            }
            if !labels.insert(ledger.label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ledger label '{}'",
                    ledger.label
                )));
            }
            if ledger.fee_rate_bps > FEE_DENOMINATOR_BPS {
                return Err(ConfigError::Invalid(format!(
                    "ledger {} fee rate {} bps exceeds {} bps",
                    ledger.ledger_id, ledger.fee_rate_bps, FEE_DENOMINATOR_BPS
                )));
            }
        }

        let origins = self.ledgers.iter().filter(|l| l.origin).count();
        if origins != 1 {
            return Err(ConfigError::Invalid(format!(
                "expected exactly one origin ledger, found {}",
                origins
            )));
        }

        Ok(())
    }

    /// Returns the origin ledger's spec. Only meaningful after `validate`.
    pub fn origin(&self) -> Option<&LedgerSpec> {
        self.ledgers.iter().find(|l| l.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DevnetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.origin().unwrap().ledger_id, DEVNET_ORIGIN_LEDGER);
    }

    #[test]
    fn fee_constants_sanity() {
        assert!(DEFAULT_FEE_RATE_BPS < FEE_DENOMINATOR_BPS);
        assert!(RELAY_BASE_FEE > 0);
        assert_ne!(ADAPTER_PARAMS_V1, ADAPTER_PARAMS_V2);
    }

    #[test]
    fn parses_minimal_json_with_defaults() {
        let raw = r#"{
            "ledgers": [
                { "ledger_id": 1, "label": "home", "origin": true },
                { "ledger_id": 2, "label": "away" }
            ]
        }"#;
        let config = DevnetConfig::from_json_str(raw).unwrap();
        assert_eq!(config.ledgers[1].fee_rate_bps, DEFAULT_FEE_RATE_BPS);
        assert!(!config.ledgers[1].origin);
        assert_eq!(config.relay, RelayFeeSchedule::default());
        assert_eq!(config.decimals, DEFAULT_DECIMALS);
    }

    #[test]
    fn two_origins_rejected() {
        let mut config = DevnetConfig::default();
        config.ledgers[1].origin = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut config = DevnetConfig::default();
        config.ledgers[1].ledger_id = config.ledgers[0].ledger_id;
        assert!(config.validate().is_err());
    }

    #[test]
    fn excessive_fee_rate_rejected() {
        let mut config = DevnetConfig::default();
        config.ledgers[0].fee_rate_bps = FEE_DENOMINATOR_BPS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devnet.json");
        let json = serde_json::to_string_pretty(&DevnetConfig::default()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = DevnetConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, DevnetConfig::default());
        assert!(matches!(
            DevnetConfig::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            DevnetConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
