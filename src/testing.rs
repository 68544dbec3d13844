//! Shared fixtures for unit tests.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::chain::{ChainClient, PriceFeed};
use crate::config::WalletConfig;
use crate::error::Result;
use crate::relay::hub::RelayHub;
use crate::storage::memory::MemoryStore;
use crate::storage::KeyValueStore;
use crate::wallet::service::WalletService;
use crate::wallet::session::ManualClock;

pub const PASSWORD: &str = "correct horse battery staple";
pub const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
/// Index 0 of `PHRASE`.
pub const FIRST_ADDRESS: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";
pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const ANVIL_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const ETH_USD: f64 = 3000.0;

#[derive(Default)]
pub struct FakeChain {
    nonce: AtomicU64,
    balance: Mutex<U256>,
    sent: Mutex<Vec<String>>,
}

impl FakeChain {
    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn set_balance(&self, wei: U256) {
        *self.balance.lock().unwrap() = wei;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn name(&self) -> &str {
        "fake"
    }

    async fn get_balance(&self, _rpc_url: &str, _address: &str) -> Result<U256> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_transaction_count(&self, _rpc_url: &str, _address: &str) -> Result<u64> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn send_raw_transaction(&self, _rpc_url: &str, raw_hex: &str) -> Result<String> {
        self.sent.lock().unwrap().push(raw_hex.to_string());
        let raw = hex::decode(raw_hex.trim_start_matches("0x")).unwrap();
        Ok(format!("0x{}", hex::encode(keccak256(raw))))
    }

    async fn get_transaction_receipt(&self, _rpc_url: &str, tx_hash: &str) -> Result<Option<Value>> {
        Ok(Some(json!({ "transactionHash": tx_hash, "status": "0x1" })))
    }
}

pub struct FixedPrice(pub f64);

#[async_trait]
impl PriceFeed for FixedPrice {
    async fn eth_usd(&self) -> Result<f64> {
        Ok(self.0)
    }
}

pub struct Fixture {
    pub service: Arc<WalletService>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<ManualClock>,
    pub chain: Arc<FakeChain>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(WalletConfig::default())
    }

    pub fn with_config(config: WalletConfig) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let chain = Arc::new(FakeChain::default());
        let service = WalletService::new(
            config,
            store.clone(),
            chain.clone(),
            Arc::new(FixedPrice(ETH_USD)),
            Arc::new(RelayHub::new()),
        )
        .with_clock(clock.clone());
        Self {
            service: Arc::new(service),
            store,
            clock,
            chain,
        }
    }

    /// A wallet set up with `PASSWORD` / `PHRASE` and left unlocked.
    pub async fn initialized() -> Self {
        Self::initialized_with(WalletConfig::default()).await
    }

    pub async fn initialized_with(config: WalletConfig) -> Self {
        let fx = Self::with_config(config);
        fx.service.set_wallet_password(PASSWORD, PHRASE).await.unwrap();
        fx
    }
}
