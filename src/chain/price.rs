/// Spot price quote from a CoinGecko-style `simple/price` endpoint.
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::PriceFeed;
use crate::error::{Result, WalletError};

pub struct CoinGeckoPriceFeed {
    client: Client,
    url: String,
}

impl CoinGeckoPriceFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

/// Extracts `ethereum.usd` from a `simple/price` body.
pub fn parse_eth_usd(body: &Value) -> Result<f64> {
    body.get("ethereum")
        .and_then(|e| e.get("usd"))
        .and_then(Value::as_f64)
        .ok_or_else(|| WalletError::Provider("price quote missing ethereum.usd".into()))
}

#[async_trait]
impl PriceFeed for CoinGeckoPriceFeed {
    async fn eth_usd(&self) -> Result<f64> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| WalletError::Provider(format!("price quote: {e}")))?
            .error_for_status()
            .map_err(|e| WalletError::Provider(format!("price quote: {e}")))?
            .json()
            .await
            .map_err(|e| WalletError::Provider(format!("price quote parse error: {e}")))?;
        parse_eth_usd(&body)
    }
}
