//! C12 — immutable, eagerly-validated startup configuration.
//!
//! The network set is closed (eight fixed prefixes, each mapped to a fixed
//! chain-id), so it is represented as a static table rather than open
//! reflection, per SPEC_FULL §9's design note. Each entry is populated from
//! a `{PREFIX}_INFURA_URL` / `{PREFIX}_CUSTODY_CONTRACT_ADDRESS` /
//! `{PREFIX}_ADJUDICATOR_ADDRESS` environment triple; a network with no
//! `INFURA_URL`/`CUSTODY_CONTRACT_ADDRESS` configured is simply absent from
//! the running node.

use alloy::primitives::Address;
use std::env;
use std::str::FromStr;

const KNOWN_NETWORKS: &[(&str, u32)] = &[
    ("POLYGON", 137),
    ("ETH_SEPOLIA", 11155111),
    ("CELO", 42220),
    ("BASE", 8453),
    ("WORLD_CHAIN", 480),
    ("ROOTSTOCK", 30),
    ("FLOW", 747),
    ("LOCALNET", 1337),
];

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u32,
    pub rpc_url: String,
    pub custody_address: Address,
    pub adjudicator_address: Address,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingRequired(&'static str),
    #[error("invalid address in {env_var}: {source}")]
    InvalidAddress {
        env_var: String,
        #[source]
        source: alloy::primitives::AddressError,
    },
    #[error("no networks configured: at least one {{PREFIX}}_INFURA_URL / {{PREFIX}}_CUSTODY_CONTRACT_ADDRESS pair is required")]
    NoNetworksConfigured,
}

/// Built once at process start, then shared by `Arc` reference. Never
/// reloaded; there is no hot-reload story for broker identity or network
/// wiring.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub broker_private_key_hex: String,
    pub msg_expiry_secs: u64,
    pub networks: Vec<NetworkConfig>,
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,
}

impl Config {
    /// Loads and eagerly validates configuration from the process
    /// environment. Fails fast on a missing broker key or an unparseable
    /// contract address rather than surfacing the failure lazily on first
    /// use.
    pub fn load() -> Result<Self, ConfigError> {
        let database_url = env::var("CLEARNODE_DATABASE_URL")
            .map_err(|_| ConfigError::MissingRequired("CLEARNODE_DATABASE_URL"))?;

        let broker_private_key_hex = env::var("BROKER_PRIVATE_KEY")
            .map_err(|_| ConfigError::MissingRequired("BROKER_PRIVATE_KEY"))?;

        let msg_expiry_secs = env::var("MSG_EXPIRY_TIME")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let metrics_port = env::var("METRICS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4242);

        let mut networks = Vec::new();
        for (prefix, chain_id) in KNOWN_NETWORKS {
            let rpc_url = env::var(format!("{prefix}_INFURA_URL")).ok();
            let custody = env::var(format!("{prefix}_CUSTODY_CONTRACT_ADDRESS")).ok();
            let adjudicator = env::var(format!("{prefix}_ADJUDICATOR_ADDRESS")).ok();

            let (Some(rpc_url), Some(custody)) = (rpc_url, custody) else {
                continue;
            };

            let custody_address = Address::from_str(&custody).map_err(|source| ConfigError::InvalidAddress {
                env_var: format!("{prefix}_CUSTODY_CONTRACT_ADDRESS"),
                source: alloy::primitives::AddressError::Hex(source),
            })?;
            let adjudicator_address = match adjudicator {
                Some(a) => Address::from_str(&a).map_err(|source| ConfigError::InvalidAddress {
                    env_var: format!("{prefix}_ADJUDICATOR_ADDRESS"),
                    source: alloy::primitives::AddressError::Hex(source),
                })?,
                None => Address::ZERO,
            };

            networks.push(NetworkConfig {
                name: prefix.to_lowercase(),
                chain_id: *chain_id,
                rpc_url,
                custody_address,
                adjudicator_address,
            });
        }

        if networks.is_empty() {
            return Err(ConfigError::NoNetworksConfigured);
        }

        Ok(Self {
            database_url,
            broker_private_key_hex,
            msg_expiry_secs,
            networks,
            host,
            port,
            metrics_port,
        })
    }

    pub fn network_by_chain_id(&self, chain_id: u32) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_network_table_matches_spec_chain_ids() {
        let expect: &[(&str, u32)] = &[
            ("POLYGON", 137),
            ("ETH_SEPOLIA", 11155111),
            ("CELO", 42220),
            ("BASE", 8453),
            ("WORLD_CHAIN", 480),
            ("ROOTSTOCK", 30),
            ("FLOW", 747),
            ("LOCALNET", 1337),
        ];
        assert_eq!(KNOWN_NETWORKS, expect);
    }
}
