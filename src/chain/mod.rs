/// External collaborators: the JSON-RPC node and the price quote endpoint.
///
/// Both sit behind traits so the wallet can be exercised without network
/// access. Only balance lookups, nonce lookups, raw broadcast and receipt
/// polling go through the node; the wallet never tracks chain state itself.
pub mod ethereum;
pub mod price;

use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{Result, WalletError};

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Human-readable client name, used in log lines.
    fn name(&self) -> &str;

    async fn get_balance(&self, rpc_url: &str, address: &str) -> Result<U256>;

    /// Pending nonce of `address`.
    async fn get_transaction_count(&self, rpc_url: &str, address: &str) -> Result<u64>;

    /// Broadcasts a signed EIP-2718 envelope. Returns the transaction hash.
    async fn send_raw_transaction(&self, rpc_url: &str, raw_hex: &str) -> Result<String>;

    /// `None` until the transaction is mined.
    async fn get_transaction_receipt(&self, rpc_url: &str, tx_hash: &str)
        -> Result<Option<Value>>;
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Spot price of one ether in US dollars.
    async fn eth_usd(&self) -> Result<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub address: String,
    /// Decimal wei amount.
    pub wei: String,
    pub eth: f64,
    /// `None` when the price quote is unavailable.
    pub usd: Option<f64>,
}

impl Balance {
    pub fn new(address: &str, wei: U256, price: Option<f64>) -> Self {
        let eth = wei_to_eth(wei);
        Self {
            address: address.to_string(),
            wei: wei.to_string(),
            eth,
            usd: price.map(|p| eth * p),
        }
    }
}

pub fn wei_to_eth(wei: U256) -> f64 {
    let wei: f64 = wei.to_string().parse().unwrap_or(f64::MAX);
    wei / 1e18
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(hex_value: &str) -> Result<U256> {
    let digits = hex_value
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::Provider(format!("not a hex quantity: {hex_value}")))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| WalletError::Provider(format!("bad quantity {hex_value}: {e}")))
}

/// Polls for a receipt until it appears or `max_attempts` is spent.
pub async fn wait_for_receipt(
    client: &dyn ChainClient,
    rpc_url: &str,
    tx_hash: &str,
    interval: Duration,
    max_attempts: u32,
) -> Result<Value> {
    for attempt in 1..=max_attempts {
        if let Some(receipt) = client.get_transaction_receipt(rpc_url, tx_hash).await? {
            info!(tx = %tx_hash, attempt, "Transaction mined");
            return Ok(receipt);
        }
        tokio::time::sleep(interval).await;
    }
    Err(WalletError::Provider(format!(
        "no receipt for {tx_hash} after {max_attempts} attempts"
    )))
}
