//! Configuration for the facilitator server.
//!
//! Everything is environment-driven (a `.env` file is loaded at startup):
//!
//! - `HOST`, `PORT` - bind address (default `0.0.0.0:8402`)
//! - `THOR_NODE_URL` - node REST base URL
//! - `NETWORK` - CAIP-2 id of the served network (default `eip155:100009`)
//! - `DB_PATH` - SQLite file holding the nonce table and delegation log
//! - `FEE_DELEGATION_ENABLED`, `DELEGATOR_PRIVATE_KEY` - gas sponsorship
//! - `DELEGATION_MAX_VTHO_PER_TX`, `DELEGATION_MAX_TX_PER_HOUR` - spend limits
//! - `CONFIRMATION_BLOCKS`, `CONFIRMATION_POLL_MS`, `CONFIRMATION_MAX_ATTEMPTS`

use alloy_primitives::U256;
use alloy_signer_local::PrivateKeySigner;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;

use crate::facilitator_local::ConfirmationPolicy;
use crate::network::Network;

/// Default VTHO ceiling per sponsored transaction: 100 VTHO in wei.
const DEFAULT_MAX_VTHO_PER_TX: &str = "100000000000000000000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {variable}: {reason}")]
    Invalid {
        variable: &'static str,
        reason: String,
    },
    #[error("{variable} is required when fee delegation is enabled")]
    Missing { variable: &'static str },
}

/// Fee delegation settings.
#[derive(Debug, Clone)]
pub struct DelegationConfig {
    pub enabled: bool,
    delegator_private_key: Option<String>,
    pub max_vtho_per_tx: U256,
    pub max_tx_per_hour: u64,
}

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub node_url: String,
    pub network: Network,
    pub db_path: String,
    pub confirmation: ConfirmationPolicy,
    pub delegation: DelegationConfig,
}

fn parse_env<T: FromStr>(variable: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(variable).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        variable,
        reason: e.to_string(),
    })
}

impl Config {
    /// Loads the configuration, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host: IpAddr = parse_env("HOST", "0.0.0.0")?;
        let port: u16 = parse_env("PORT", "8402")?;
        let node_url =
            env::var("THOR_NODE_URL").unwrap_or_else(|_| "https://mainnet.vechain.org".to_string());
        let network_id = env::var("NETWORK").unwrap_or_else(|_| "eip155:100009".to_string());
        let network = Network::resolve(&network_id).ok_or(ConfigError::Invalid {
            variable: "NETWORK",
            reason: format!("{network_id} is not a supported network"),
        })?;
        let db_path = env::var("DB_PATH").unwrap_or_else(|_| "facilitator.db".to_string());

        let confirmation = ConfirmationPolicy {
            confirmations: parse_env("CONFIRMATION_BLOCKS", "1")?,
            poll_interval_ms: parse_env("CONFIRMATION_POLL_MS", "3000")?,
            max_attempts: parse_env("CONFIRMATION_MAX_ATTEMPTS", "20")?,
        };

        let enabled: bool = parse_env("FEE_DELEGATION_ENABLED", "false")?;
        let delegator_private_key = env::var("DELEGATOR_PRIVATE_KEY").ok();
        if enabled && delegator_private_key.is_none() {
            return Err(ConfigError::Missing {
                variable: "DELEGATOR_PRIVATE_KEY",
            });
        }
        let max_vtho_raw =
            env::var("DELEGATION_MAX_VTHO_PER_TX").unwrap_or_else(|_| DEFAULT_MAX_VTHO_PER_TX.into());
        let max_vtho_per_tx =
            U256::from_str_radix(&max_vtho_raw, 10).map_err(|e| ConfigError::Invalid {
                variable: "DELEGATION_MAX_VTHO_PER_TX",
                reason: e.to_string(),
            })?;
        let delegation = DelegationConfig {
            enabled,
            delegator_private_key,
            max_vtho_per_tx,
            max_tx_per_hour: parse_env("DELEGATION_MAX_TX_PER_HOUR", "10")?,
        };

        Ok(Config {
            host,
            port,
            node_url,
            network,
            db_path,
            confirmation,
            delegation,
        })
    }

    /// Builds the delegator signer when fee delegation is enabled.
    pub fn delegator_signer(&self) -> Result<Option<PrivateKeySigner>, ConfigError> {
        if !self.delegation.enabled {
            return Ok(None);
        }
        let key = self
            .delegation
            .delegator_private_key
            .as_deref()
            .ok_or(ConfigError::Missing {
                variable: "DELEGATOR_PRIVATE_KEY",
            })?;
        let bytes = hex::decode(key.trim_start_matches("0x")).map_err(|e| ConfigError::Invalid {
            variable: "DELEGATOR_PRIVATE_KEY",
            reason: e.to_string(),
        })?;
        let signer = PrivateKeySigner::from_slice(&bytes).map_err(|e| ConfigError::Invalid {
            variable: "DELEGATOR_PRIVATE_KEY",
            reason: e.to_string(),
        })?;
        Ok(Some(signer))
    }
}
