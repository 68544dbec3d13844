/// Runtime configuration for the wallet background.
///
/// Loaded from an optional JSON file, then overridden by `HASHED_*`
/// environment variables.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WalletError};
use crate::state::models::{CustomChain, Network};

pub const ENV_RPC_API_KEY: &str = "HASHED_RPC_API_KEY";
pub const ENV_DATA_DIR: &str = "HASHED_DATA_DIR";
pub const ENV_UNLOCK_DURATION_MS: &str = "HASHED_UNLOCK_DURATION_MS";

const GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// How long an unlock stays valid.
    pub unlock_duration_ms: i64,
    pub expiry_check_interval_secs: u64,
    /// How long an approval window may stay open without a decision.
    pub approval_timeout_secs: u64,
    /// How long a connect request waits for the user to unlock.
    pub unlock_wait_timeout_secs: u64,
    /// Page-side timeout for a relayed request.
    pub request_timeout_ms: u64,
    pub popup_width: u32,
    pub popup_height: u32,
    /// Node endpoint per network name; the API key is appended when set.
    pub rpc_urls: BTreeMap<String, String>,
    pub rpc_api_key: Option<String>,
    pub price_url: String,
    pub gas_limit: u64,
    pub max_fee_per_gas_gwei: u64,
    pub max_priority_fee_gwei: u64,
    pub data_dir: PathBuf,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let rpc_urls = BTreeMap::from([
            (
                Network::EthereumMainnet.to_string(),
                "https://eth-mainnet.g.alchemy.com/v2/".to_string(),
            ),
            (
                Network::SepoliaTestnet.to_string(),
                "https://eth-sepolia.g.alchemy.com/v2/".to_string(),
            ),
        ]);
        Self {
            unlock_duration_ms: 900_000, // 15 min
            expiry_check_interval_secs: 60,
            approval_timeout_secs: 180,
            unlock_wait_timeout_secs: 120,
            request_timeout_ms: 30_000,
            popup_width: 357,
            popup_height: 600,
            rpc_urls,
            rpc_api_key: None,
            price_url:
                "https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd"
                    .to_string(),
            gas_limit: 21_000,
            max_fee_per_gas_gwei: 30,
            max_priority_fee_gwei: 2,
            data_dir: PathBuf::from(".hashed-wallet"),
        }
    }
}

impl WalletConfig {
    /// Reads `path` if given and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                serde_json::from_str(&raw).map_err(|e| {
                    WalletError::Serialization(format!("config {}: {e}", p.display()))
                })?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        info!(data_dir = %config.data_dir.display(), "Loaded wallet config");
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = lookup(ENV_RPC_API_KEY) {
            self.rpc_api_key = Some(key);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_UNLOCK_DURATION_MS) {
            self.unlock_duration_ms = ms.parse().map_err(|_| {
                WalletError::InvalidParams(format!("{ENV_UNLOCK_DURATION_MS} must be an integer"))
            })?;
        }
        Ok(())
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_check_interval_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn unlock_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.unlock_wait_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn max_fee_per_gas_wei(&self) -> u128 {
        self.max_fee_per_gas_gwei as u128 * GWEI
    }

    pub fn max_priority_fee_wei(&self) -> u128 {
        self.max_priority_fee_gwei as u128 * GWEI
    }

    /// Node endpoint for `network`. Custom chains use their first RPC url.
    pub fn rpc_url(&self, network: &Network, custom: &[CustomChain]) -> Result<String> {
        if let Network::Custom(id) = network {
            return custom
                .iter()
                .find(|c| &c.chain_id == id)
                .and_then(|c| c.rpc_urls.first().cloned())
                .ok_or_else(|| WalletError::UnknownChain(id.clone()));
        }
        let base = self
            .rpc_urls
            .get(network.as_str())
            .ok_or_else(|| WalletError::Provider(format!("no RPC endpoint for {network}")))?;
        Ok(match &self.rpc_api_key {
            Some(key) => format!("{base}{key}"),
            None => base.clone(),
        })
    }
}
