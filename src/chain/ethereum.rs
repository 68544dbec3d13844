/// Ethereum JSON-RPC client over HTTP.
///
/// Raw `POST` of JSON-RPC 2.0 bodies; any node provider works (the default
/// config points at Alchemy).
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use super::{parse_quantity, ChainClient};
use crate::error::{Result, WalletError};

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: Option<i64>,
    message: String,
}

pub struct JsonRpcClient {
    client: Client,
    next_id: AtomicU64,
}

impl Default for JsonRpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        rpc_url: &str,
        method: &str,
        params: Value,
    ) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::Provider(format!("{method}: {e}")))?
            .json()
            .await
            .map_err(|e| WalletError::Provider(format!("{method} response parse error: {e}")))?;

        if let Some(err) = resp.error {
            error!(method, code = ?err.code, message = %err.message, "Node returned an error");
            return Err(WalletError::Provider(format!("{method}: {}", err.message)));
        }
        Ok(resp.result)
    }

    async fn rpc_required<T: DeserializeOwned>(
        &self,
        rpc_url: &str,
        method: &str,
        params: Value,
    ) -> Result<T> {
        self.rpc_call(rpc_url, method, params)
            .await?
            .ok_or_else(|| WalletError::Provider(format!("{method}: empty response")))
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    fn name(&self) -> &str {
        "json-rpc"
    }

    async fn get_balance(&self, rpc_url: &str, address: &str) -> Result<U256> {
        let hex: String = self
            .rpc_required(rpc_url, "eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_quantity(&hex)
    }

    async fn get_transaction_count(&self, rpc_url: &str, address: &str) -> Result<u64> {
        let hex: String = self
            .rpc_required(rpc_url, "eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        let count = parse_quantity(&hex)?;
        u64::try_from(count).map_err(|_| WalletError::Provider(format!("nonce overflow: {hex}")))
    }

    async fn send_raw_transaction(&self, rpc_url: &str, raw_hex: &str) -> Result<String> {
        let hash: String = self
            .rpc_required(rpc_url, "eth_sendRawTransaction", json!([raw_hex]))
            .await?;
        info!(tx = %hash, "Broadcast transaction");
        Ok(hash)
    }

    async fn get_transaction_receipt(
        &self,
        rpc_url: &str,
        tx_hash: &str,
    ) -> Result<Option<Value>> {
        self.rpc_call(rpc_url, "eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        let ok: JsonRpcResponse<String> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap();
        assert_eq!(ok.result.as_deref(), Some("0x10"));
        assert!(ok.error.is_none());

        let err: JsonRpcResponse<String> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#,
        )
        .unwrap();
        let err = err.error.unwrap();
        assert_eq!(err.code, Some(-32000));
        assert_eq!(err.message, "nonce too low");

        let pending: JsonRpcResponse<Value> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(pending.result.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_a_provider_error() {
        let client = JsonRpcClient::new();
        let err = client
            .get_balance("http://127.0.0.1:9", "0x0000000000000000000000000000000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Provider(_)));
    }
}
