/// The background's wallet service.
///
/// Owns the unlock session and the account registry and is the only place
/// key material is ever materialized. Handlers (the RPC dispatcher, the
/// background message loop, the CLI) receive it by `Arc` rather than
/// reaching for global state.
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Bytes, U256};
use alloy_signer_local::PrivateKeySigner;
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use super::registry::AccountRegistry;
use super::session::{Clock, SessionMaterial, SystemClock, WalletSession};
use crate::chain::{parse_quantity, Balance, ChainClient, PriceFeed};
use crate::config::WalletConfig;
use crate::crypto::cipher::{self, MIN_MNEMONIC_WORDS};
use crate::crypto::kdf;
use crate::crypto::keys;
use crate::crypto::sensitive::{SecretString, SensitiveBytes32};
use crate::crypto::sign::{self, Eip1559Request};
use crate::error::{Result, WalletError};
use crate::relay::hub::RelayHub;
use crate::relay::protocol::WalletEvent;
use crate::state::models::*;
use crate::state::repository;
use crate::storage::KeyValueStore;

struct Inner {
    session: WalletSession,
    registry: Option<AccountRegistry>,
}

pub struct WalletService {
    config: WalletConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    chain: Arc<dyn ChainClient>,
    price: Arc<dyn PriceFeed>,
    hub: Arc<RelayHub>,
    inner: Mutex<Inner>,
    unlocked: watch::Sender<bool>,
}

/// PBKDF2 runs off the async workers.
async fn derive_key(password: &str, salt: Vec<u8>) -> Result<SensitiveBytes32> {
    let password = SecretString::new(password);
    tokio::task::spawn_blocking(move || kdf::derive_key(password.expose(), &salt))
        .await
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))
}

fn wrong_password(e: WalletError) -> WalletError {
    match e {
        WalletError::DecryptionFailed(_) => WalletError::WrongPassword,
        other => other,
    }
}

impl WalletService {
    pub fn new(
        config: WalletConfig,
        store: Arc<dyn KeyValueStore>,
        chain: Arc<dyn ChainClient>,
        price: Arc<dyn PriceFeed>,
        hub: Arc<RelayHub>,
    ) -> Self {
        let session = WalletSession::new(config.unlock_duration_ms);
        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
            chain,
            price,
            hub,
            inner: Mutex::new(Inner {
                session,
                registry: None,
            }),
            unlocked: watch::Sender::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn hub(&self) -> Arc<RelayHub> {
        self.hub.clone()
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // ── Session lifecycle ──

    pub async fn is_initialized(&self) -> Result<bool> {
        repository::vault_exists(&*self.store).await
    }

    /// First-time setup: encrypts `mnemonic` under `password` and creates
    /// "Account 1" at index 0. Leaves the session unlocked.
    pub async fn set_wallet_password(&self, password: &str, mnemonic: &str) -> Result<bool> {
        if password.is_empty() {
            return Err(WalletError::InvalidParams("password must not be empty".into()));
        }
        let phrase = SecretString::new(mnemonic.split_whitespace().collect::<Vec<_>>().join(" "));
        if phrase.expose().split(' ').count() < MIN_MNEMONIC_WORDS {
            return Err(WalletError::InvalidMnemonic(format!(
                "expected at least {MIN_MNEMONIC_WORDS} words"
            )));
        }
        keys::validate_mnemonic(phrase.expose())?;

        let mut inner = self.inner.lock().await;
        if repository::vault_exists(&*self.store).await? {
            return Err(WalletError::AlreadyInitialized);
        }

        let salt = kdf::generate_salt();
        let iv = cipher::generate_iv();
        let key = derive_key(password, salt.to_vec()).await?;
        let ciphertext = cipher::encrypt_mnemonic(phrase.expose(), &key, &iv)?;
        let vault = VaultRecord::new(&ciphertext, &salt, &iv);

        let mut registry = AccountRegistry::default();
        let name = registry.default_account_name();
        registry.create_from_seed(&name, phrase.expose())?;
        let accounts = registry.seal_accounts(&key)?;
        repository::initialize(&*self.store, &vault, &accounts, registry.network()).await?;

        let selected = registry.selected().map(|a| a.public_key.clone());
        inner.session.unlock(
            SessionMaterial {
                mnemonic: phrase,
                key,
            },
            self.now_ms(),
        );
        inner.registry = Some(registry);
        drop(inner);

        info!(store = self.store.name(), "Wallet initialized");
        self.publish_unlocked(selected);
        Ok(true)
    }

    /// Verifies `password` against the vault. A wrong password yields
    /// `Ok(false)` and leaves the session locked.
    pub async fn unlock_wallet(&self, password: &str) -> Result<bool> {
        let vault = repository::load_vault(&*self.store)
            .await?
            .ok_or(WalletError::NotInitialized)?;
        let iv = vault.iv_bytes()?;
        let ciphertext = vault.ciphertext_bytes()?;
        let key = derive_key(password, vault.salt_bytes()?).await?;

        let mnemonic = match cipher::decrypt_mnemonic(&ciphertext, &key, &iv) {
            Ok(m) => m,
            Err(WalletError::DecryptionFailed(reason)) => {
                warn!(reason = %reason, "Unlock failed: wrong password");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let registry = AccountRegistry::open(
            repository::load_accounts(&*self.store).await?,
            repository::load_saved(&*self.store).await?,
            repository::load_network(&*self.store).await?,
            &key,
        );
        let selected = registry.selected().map(|a| a.public_key.clone());
        info!(
            accounts = registry.accounts().len(),
            next_index = registry.next_seed_index(),
            network = %registry.network(),
            "Wallet unlocked"
        );

        let mut inner = self.inner.lock().await;
        inner
            .session
            .unlock(SessionMaterial { mnemonic, key }, self.now_ms());
        inner.registry = Some(registry);
        drop(inner);

        self.publish_unlocked(selected);
        Ok(true)
    }

    pub async fn lock(&self) {
        let was_unlocked = {
            let mut inner = self.inner.lock().await;
            inner.registry = None;
            inner.session.lock()
        };
        self.publish_locked(was_unlocked);
    }

    /// Locks if the unlock window has lapsed. Returns whether it did.
    pub async fn check_expiry(&self) -> bool {
        let expired = {
            let mut inner = self.inner.lock().await;
            let expired = inner.session.expire_if_due(self.now_ms());
            if expired {
                inner.registry = None;
            }
            expired
        };
        if expired {
            info!("Unlock window elapsed");
            self.publish_locked(true);
        }
        expired
    }

    pub async fn is_unlocked(&self) -> bool {
        self.inner.lock().await.session.is_unlocked(self.now_ms())
    }

    /// Waits for an unlock signalled from the popup, up to `timeout`.
    pub async fn wait_until_unlocked(&self, timeout: Duration) -> bool {
        let mut rx = self.unlocked.subscribe();
        if self.is_unlocked().await {
            return true;
        }
        let signalled = tokio::time::timeout(timeout, async {
            loop {
                if rx.changed().await.is_err() {
                    return false;
                }
                if *rx.borrow_and_update() {
                    return true;
                }
            }
        })
        .await;
        matches!(signalled, Ok(true)) && self.is_unlocked().await
    }

    fn publish_unlocked(&self, selected: Option<String>) {
        self.unlocked.send_replace(true);
        self.hub.broadcast(WalletEvent::WalletUnlocked);
        self.hub.broadcast(WalletEvent::AccountsChanged {
            accounts: selected.into_iter().collect(),
        });
    }

    fn publish_locked(&self, was_unlocked: bool) {
        self.unlocked.send_replace(false);
        if was_unlocked {
            info!("Wallet locked");
            self.hub.broadcast(WalletEvent::WalletLocked);
        }
    }

    /// Re-encrypts the vault and every record under `new_password`.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(WalletError::InvalidParams("password must not be empty".into()));
        }
        let mut inner = self.inner.lock().await;

        let vault = repository::load_vault(&*self.store)
            .await?
            .ok_or(WalletError::NotInitialized)?;
        let old_key = derive_key(old_password, vault.salt_bytes()?).await?;
        let mnemonic =
            cipher::decrypt_mnemonic(&vault.ciphertext_bytes()?, &old_key, &vault.iv_bytes()?)
                .map_err(wrong_password)?;

        let registry = AccountRegistry::open(
            repository::load_accounts(&*self.store).await?,
            repository::load_saved(&*self.store).await?,
            repository::load_network(&*self.store).await?,
            &old_key,
        );
        if registry.has_unreadable_records() {
            return Err(WalletError::DecryptionFailed(
                "some records are unreadable under the current password".into(),
            ));
        }

        let salt = kdf::generate_salt();
        let iv = cipher::generate_iv();
        let new_key = derive_key(new_password, salt.to_vec()).await?;
        let ciphertext = cipher::encrypt_mnemonic(mnemonic.expose(), &new_key, &iv)?;
        let accounts = registry.seal_accounts(&new_key)?;
        let saved = registry.seal_saved(&new_key)?;
        repository::replace_secrets(
            &*self.store,
            &VaultRecord::new(&ciphertext, &salt, &iv),
            &accounts,
            &saved,
        )
        .await?;

        inner.session.replace_key(new_key);
        info!(accounts = accounts.len(), saved = saved.len(), "Password changed");
        Ok(())
    }

    /// Returns the seed phrase after re-checking the password.
    pub async fn reveal_seed(&self, password: &str) -> Result<SecretString> {
        let vault = repository::load_vault(&*self.store)
            .await?
            .ok_or(WalletError::NotInitialized)?;
        let key = derive_key(password, vault.salt_bytes()?).await?;
        cipher::decrypt_mnemonic(&vault.ciphertext_bytes()?, &key, &vault.iv_bytes()?)
            .map_err(wrong_password)
    }

    // ── Registry access ──

    async fn read<T>(
        &self,
        f: impl FnOnce(&AccountRegistry, &SessionMaterial) -> Result<T>,
    ) -> Result<T> {
        let inner = self.inner.lock().await;
        let material = inner.session.material(self.now_ms())?;
        let registry = inner.registry.as_ref().ok_or(WalletError::WalletLocked)?;
        f(registry, material)
    }

    /// Applies `f` and persists the sealed registry. Restores the previous
    /// registry if either step fails.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut AccountRegistry, &SessionMaterial) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.inner.lock().await;
        let now = self.now_ms();
        let Inner { session, registry } = &mut *guard;
        let material = session.material(now)?;
        let registry = registry.as_mut().ok_or(WalletError::WalletLocked)?;

        let before = registry.clone();
        let out = match f(registry, material) {
            Ok(out) => out,
            Err(e) => {
                *registry = before;
                return Err(e);
            }
        };

        let persisted = match (
            registry.seal_accounts(&material.key),
            registry.seal_saved(&material.key),
        ) {
            (Ok(accounts), Ok(saved)) => {
                repository::save_registry(&*self.store, &accounts, &saved).await
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        if let Err(e) = persisted {
            warn!(error = %e, "Persisting registry failed, rolling back");
            *registry = before;
            return Err(e);
        }
        Ok(out)
    }

    pub async fn snapshot(&self) -> Result<WalletSnapshot> {
        self.read(|r, _| Ok(r.snapshot())).await
    }

    /// Addresses exposed to a page without prompting: empty while locked.
    pub async fn exposed_accounts(&self) -> Vec<String> {
        self.read(|r, _| Ok(r.selected().map(|a| a.public_key.clone())))
            .await
            .ok()
            .flatten()
            .into_iter()
            .collect()
    }

    pub async fn selected_account(&self) -> Result<PublicAccount> {
        self.read(|r, _| {
            r.selected()
                .map(Account::to_public)
                .ok_or(WalletError::NoAccountsAvailable)
        })
        .await
    }

    pub async fn accounts(&self) -> Result<Vec<PublicAccount>> {
        self.read(|r, _| Ok(r.accounts().iter().map(Account::to_public).collect()))
            .await
    }

    pub async fn create_account(&self, name: Option<&str>) -> Result<PublicAccount> {
        self.mutate(|r, m| {
            let name = name
                .map(str::to_string)
                .unwrap_or_else(|| r.default_account_name());
            r.create_from_seed(&name, m.mnemonic.expose())
                .map(|a| a.to_public())
        })
        .await
    }

    pub async fn import_account(&self, name: &str, private_key: &str) -> Result<PublicAccount> {
        self.mutate(|r, _| {
            r.import_from_private_key(name, private_key)
                .map(|a| a.to_public())
        })
        .await
    }

    pub async fn add_watch_only(&self, name: &str, public_key: &str) -> Result<PublicAccount> {
        self.mutate(|r, _| r.add_watch_only(name, public_key).map(|a| a.to_public()))
            .await
    }

    pub async fn delete_account(&self, name: &str, public_key: &str) -> Result<()> {
        let selected = self
            .mutate(|r, _| {
                r.delete_account(name, public_key)?;
                Ok(r.selected().map(|a| a.public_key.clone()))
            })
            .await?;
        self.hub.broadcast(WalletEvent::AccountsChanged {
            accounts: selected.into_iter().collect(),
        });
        Ok(())
    }

    pub async fn select_account(&self, public_key: &str) -> Result<PublicAccount> {
        let selected = {
            let mut guard = self.inner.lock().await;
            let now = self.now_ms();
            let Inner { session, registry } = &mut *guard;
            session.material(now)?;
            let registry = registry.as_mut().ok_or(WalletError::WalletLocked)?;
            registry.select(public_key)?.to_public()
        };
        self.hub.broadcast(WalletEvent::AccountsChanged {
            accounts: vec![selected.public_key.clone()],
        });
        Ok(selected)
    }

    pub async fn saved_addresses(&self) -> Result<Vec<SavedAddress>> {
        self.read(|r, _| Ok(r.saved().to_vec())).await
    }

    pub async fn add_saved_address(&self, name: &str, public_key: &str) -> Result<SavedAddress> {
        self.mutate(|r, _| r.add_saved(name, public_key)).await
    }

    pub async fn update_saved_address(
        &self,
        index: usize,
        name: Option<&str>,
        public_key: Option<&str>,
    ) -> Result<SavedAddress> {
        self.mutate(|r, _| r.update_saved(index, name, public_key))
            .await
    }

    pub async fn delete_saved_address(&self, name: &str, public_key: &str) -> Result<()> {
        self.mutate(|r, _| r.delete_saved(name, public_key)).await
    }

    // ── Networks ──

    /// The selected network; read from the store while locked.
    pub async fn network(&self) -> Result<Network> {
        if let Ok(network) = self.read(|r, _| Ok(r.network().clone())).await {
            return Ok(network);
        }
        repository::load_network(&*self.store).await
    }

    /// Chain id for pages. Mainnet when there is no unlocked session.
    pub async fn chain_id(&self) -> String {
        self.read(|r, _| Ok(r.network().chain_id()))
            .await
            .unwrap_or_else(|_| MAINNET_CHAIN_ID.to_string())
    }

    pub async fn change_network(&self, network: Network) -> Result<String> {
        repository::save_network(&*self.store, &network).await?;
        if let Some(registry) = self.inner.lock().await.registry.as_mut() {
            registry.set_network(network.clone());
        }
        let chain_id = network.chain_id();
        info!(network = %network, chain_id = %chain_id, "Network changed");
        self.hub.broadcast(WalletEvent::ChainChanged {
            chain_id: chain_id.clone(),
        });
        Ok(chain_id)
    }

    pub async fn switch_chain(&self, chain_id: &str) -> Result<String> {
        let chains = repository::load_custom_chains(&*self.store).await?;
        let network = Network::from_chain_id(chain_id, &chains)?;
        self.change_network(network).await
    }

    pub async fn add_custom_chain(&self, chain: CustomChain) -> Result<()> {
        if parse_chain_id(&chain.chain_id).is_none() {
            return Err(WalletError::InvalidParams(format!(
                "bad chain id: {}",
                chain.chain_id
            )));
        }
        repository::upsert_custom_chain(&*self.store, &chain).await?;
        info!(chain_id = %chain.chain_id, name = %chain.chain_name, "Custom chain added");
        Ok(())
    }

    async fn rpc_url(&self, network: &Network) -> Result<String> {
        if !network.is_evm() {
            return Err(WalletError::Provider(format!(
                "{network} has no EVM endpoint"
            )));
        }
        let chains = repository::load_custom_chains(&*self.store).await?;
        self.config.rpc_url(network, &chains)
    }

    // ── Chain access ──

    /// Balance of `address`, or of the selected account when `None`.
    pub async fn get_balance(&self, address: Option<&str>) -> Result<Balance> {
        let address = match address {
            Some(a) => keys::checksum_address(a)?,
            None => self.selected_account().await?.public_key,
        };
        let network = self.network().await?;
        let rpc_url = self.rpc_url(&network).await?;
        let wei = self.chain.get_balance(&rpc_url, &address).await?;
        let price = match self.price.eth_usd().await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "Price quote unavailable");
                None
            }
        };
        Ok(Balance::new(&address, wei, price))
    }

    /// Checks that the selected account can sign for `address` and returns
    /// its address. Callers pin this address for the rest of the request.
    pub async fn ensure_can_sign(&self, address: Option<&str>) -> Result<String> {
        self.read(|r, _| signing_account(r, address).map(|a| a.public_key.clone()))
            .await
    }

    async fn selected_signer(&self, address: Option<&str>) -> Result<(PrivateKeySigner, String)> {
        self.read(|r, _| {
            let account = signing_account(r, address)?;
            let key = account
                .private_key
                .as_ref()
                .ok_or(WalletError::WatchOnlyAccount)?;
            Ok((
                keys::signer_from_private_key(key.expose())?,
                account.public_key.clone(),
            ))
        })
        .await
    }

    pub async fn personal_sign(&self, message: &str, address: Option<&str>) -> Result<String> {
        let (signer, from) = self.selected_signer(address).await?;
        let signature = sign::personal_sign(&signer, message)?;
        info!(account = %from, "Signed personal message");
        Ok(signature)
    }

    pub async fn sign_typed_data(&self, address: Option<&str>, typed_data: &Value) -> Result<String> {
        let (signer, from) = self.selected_signer(address).await?;
        let signature = sign::sign_typed_data_v4(&signer, typed_data)?;
        info!(account = %from, "Signed typed data");
        Ok(signature)
    }

    /// Signs and broadcasts an EIP-1559 transaction from the selected account.
    pub async fn send_transaction(&self, tx: &Value) -> Result<String> {
        let fields = tx
            .as_object()
            .ok_or_else(|| WalletError::InvalidParams("transaction must be an object".into()))?;
        let from = fields.get("from").and_then(Value::as_str);
        let (signer, from) = self.selected_signer(from).await?;

        let network = self.network().await?;
        let rpc_url = self.rpc_url(&network).await?;

        let to = fields
            .get("to")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(keys::parse_address)
            .transpose()?;
        let value = quantity(fields, &["value"])?.unwrap_or(U256::ZERO);
        let input = match fields
            .get("data")
            .or_else(|| fields.get("input"))
            .and_then(Value::as_str)
        {
            Some(data) => Bytes::from(hex::decode(data.trim_start_matches("0x")).map_err(|_| {
                WalletError::InvalidParams("transaction data is not hex".into())
            })?),
            None => Bytes::new(),
        };
        let gas_limit = match quantity(fields, &["gas", "gasLimit"])? {
            Some(g) => to_u64(g, "gas")?,
            None => self.config.gas_limit,
        };
        let max_fee_per_gas = match quantity(fields, &["maxFeePerGas"])? {
            Some(f) => to_u128(f, "maxFeePerGas")?,
            None => self.config.max_fee_per_gas_wei(),
        };
        let max_priority_fee_per_gas = match quantity(fields, &["maxPriorityFeePerGas"])? {
            Some(f) => to_u128(f, "maxPriorityFeePerGas")?,
            None => self.config.max_priority_fee_wei(),
        };
        let nonce = match quantity(fields, &["nonce"])? {
            Some(n) => to_u64(n, "nonce")?,
            None => self.chain.get_transaction_count(&rpc_url, &from).await?,
        };

        let signed = sign::sign_eip1559(
            &signer,
            Eip1559Request {
                chain_id: network.chain_id_u64(),
                nonce,
                to,
                value,
                input,
                gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            },
        )?;
        let hash = self
            .chain
            .send_raw_transaction(&rpc_url, &signed.raw_hex())
            .await?;
        info!(account = %from, tx = %hash, nonce, network = %network, "Transaction sent");
        Ok(hash)
    }

    pub async fn wait_for_receipt(&self, tx_hash: &str, max_attempts: u32) -> Result<Value> {
        let network = self.network().await?;
        let rpc_url = self.rpc_url(&network).await?;
        crate::chain::wait_for_receipt(
            &*self.chain,
            &rpc_url,
            tx_hash,
            Duration::from_secs(2),
            max_attempts,
        )
        .await
    }
}

fn signing_account<'a>(registry: &'a AccountRegistry, address: Option<&str>) -> Result<&'a Account> {
    let account = registry.selected().ok_or(WalletError::NoAccountsAvailable)?;
    if let Some(address) = address {
        if !account.is_address(address) {
            return Err(WalletError::InvalidParams(format!(
                "{address} is not the selected account"
            )));
        }
    }
    if !account.can_sign() {
        return Err(WalletError::WatchOnlyAccount);
    }
    Ok(account)
}

/// Reads the first present key as a hex, decimal-string or numeric quantity.
fn quantity(fields: &Map<String, Value>, names: &[&str]) -> Result<Option<U256>> {
    let Some(value) = names.iter().find_map(|n| fields.get(*n)) else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(|v| Some(U256::from(v)))
            .ok_or_else(|| WalletError::InvalidParams(format!("bad quantity: {n}"))),
        Value::String(s) if s.starts_with("0x") => parse_quantity(s)
            .map(Some)
            .map_err(|_| WalletError::InvalidParams(format!("bad quantity: {s}"))),
        Value::String(s) => U256::from_str_radix(s, 10)
            .map(Some)
            .map_err(|_| WalletError::InvalidParams(format!("bad quantity: {s}"))),
        other => Err(WalletError::InvalidParams(format!("bad quantity: {other}"))),
    }
}

fn to_u64(v: U256, field: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| WalletError::InvalidParams(format!("{field} out of range")))
}

fn to_u128(v: U256, field: &str) -> Result<u128> {
    u128::try_from(v).map_err(|_| WalletError::InvalidParams(format!("{field} out of range")))
}
