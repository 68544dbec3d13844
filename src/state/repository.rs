/// Typed access to the wallet store.
///
/// Each function reads or writes one logical record. Writes that must land
/// together (initialization, password change, approval cleanup) go through
/// a single store call.
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::models::*;
use crate::error::{Result, WalletError};
use crate::storage::KeyValueStore;

pub const VAULT_KEY: &str = "vault";
pub const ACCOUNTS_KEY: &str = "accounts";
pub const SAVED_KEY: &str = "saved";
pub const NETWORK_KEY: &str = "network";
pub const CHAINS_KEY: &str = "chains";
pub const PENDING_REQUEST_PREFIX: &str = "pendingRequest:";
pub const REQUEST_RESPONSE_PREFIX: &str = "requestResponse:";

async fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| WalletError::Storage(format!("malformed {key}: {e}"))),
    }
}

fn entry<T: Serialize>(key: impl Into<String>, value: &T) -> Result<(String, Value)> {
    Ok((key.into(), serde_json::to_value(value)?))
}

fn pending_key(id: Uuid) -> String {
    format!("{PENDING_REQUEST_PREFIX}{id}")
}

fn response_key(id: Uuid) -> String {
    format!("{REQUEST_RESPONSE_PREFIX}{id}")
}

// ── Vault ──

pub async fn load_vault(store: &dyn KeyValueStore) -> Result<Option<VaultRecord>> {
    get_json(store, VAULT_KEY).await
}

pub async fn vault_exists(store: &dyn KeyValueStore) -> Result<bool> {
    Ok(load_vault(store).await?.is_some())
}

/// Writes a fresh wallet in one store call.
pub async fn initialize(
    store: &dyn KeyValueStore,
    vault: &VaultRecord,
    accounts: &[PersistedAccount],
    network: &Network,
) -> Result<()> {
    store
        .set(vec![
            entry(VAULT_KEY, vault)?,
            entry(ACCOUNTS_KEY, &accounts)?,
            entry(SAVED_KEY, &Vec::<PersistedSavedAddress>::new())?,
            entry(NETWORK_KEY, network)?,
        ])
        .await
}

/// Replaces every encrypted record at once, used by password change.
pub async fn replace_secrets(
    store: &dyn KeyValueStore,
    vault: &VaultRecord,
    accounts: &[PersistedAccount],
    saved: &[PersistedSavedAddress],
) -> Result<()> {
    store
        .set(vec![
            entry(VAULT_KEY, vault)?,
            entry(ACCOUNTS_KEY, &accounts)?,
            entry(SAVED_KEY, &saved)?,
        ])
        .await
}

// ── Accounts ──

pub async fn load_accounts(store: &dyn KeyValueStore) -> Result<Vec<PersistedAccount>> {
    Ok(get_json(store, ACCOUNTS_KEY).await?.unwrap_or_default())
}

/// Writes the account list and the saved-address book together.
pub async fn save_registry(
    store: &dyn KeyValueStore,
    accounts: &[PersistedAccount],
    saved: &[PersistedSavedAddress],
) -> Result<()> {
    store
        .set(vec![entry(ACCOUNTS_KEY, &accounts)?, entry(SAVED_KEY, &saved)?])
        .await
}

// ── Saved addresses ──

pub async fn load_saved(store: &dyn KeyValueStore) -> Result<Vec<PersistedSavedAddress>> {
    Ok(get_json(store, SAVED_KEY).await?.unwrap_or_default())
}

// ── Network ──

pub async fn load_network(store: &dyn KeyValueStore) -> Result<Network> {
    match get_json::<Network>(store, NETWORK_KEY).await {
        Ok(network) => Ok(network.unwrap_or_default()),
        Err(e) => {
            warn!(error = %e, "Stored network unreadable, using default");
            Ok(Network::default())
        }
    }
}

pub async fn save_network(store: &dyn KeyValueStore, network: &Network) -> Result<()> {
    store.set(vec![entry(NETWORK_KEY, network)?]).await
}

pub async fn load_custom_chains(store: &dyn KeyValueStore) -> Result<Vec<CustomChain>> {
    Ok(get_json(store, CHAINS_KEY).await?.unwrap_or_default())
}

/// Adds or replaces a custom chain by chain id.
pub async fn upsert_custom_chain(store: &dyn KeyValueStore, chain: &CustomChain) -> Result<()> {
    let mut chains = load_custom_chains(store).await?;
    let wanted = parse_chain_id(&chain.chain_id);
    chains.retain(|c| parse_chain_id(&c.chain_id) != wanted);
    chains.push(chain.clone());
    store.set(vec![entry(CHAINS_KEY, &chains)?]).await
}

// ── Approvals ──

pub async fn save_pending_approval(
    store: &dyn KeyValueStore,
    request: &PendingApprovalRequest,
) -> Result<()> {
    store
        .set(vec![entry(pending_key(request.approval_id), request)?])
        .await
}

pub async fn load_pending_approval(
    store: &dyn KeyValueStore,
    id: Uuid,
) -> Result<Option<PendingApprovalRequest>> {
    get_json(store, &pending_key(id)).await
}

/// All pending approvals, oldest first.
pub async fn list_pending_approvals(
    store: &dyn KeyValueStore,
) -> Result<Vec<PendingApprovalRequest>> {
    let mut pending = Vec::new();
    for key in store.keys(PENDING_REQUEST_PREFIX).await? {
        match get_json::<PendingApprovalRequest>(store, &key).await {
            Ok(Some(request)) => pending.push(request),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Skipping unreadable approval record"),
        }
    }
    pending.sort_by_key(|p| p.created_at_ms);
    Ok(pending)
}

pub async fn save_approval_response(
    store: &dyn KeyValueStore,
    id: Uuid,
    response: RequestResponse,
) -> Result<()> {
    store.set(vec![entry(response_key(id), &response)?]).await
}

pub async fn load_approval_response(
    store: &dyn KeyValueStore,
    id: Uuid,
) -> Result<Option<RequestResponse>> {
    get_json(store, &response_key(id)).await
}

/// Removes the pending request and its response together.
pub async fn clear_approval(store: &dyn KeyValueStore, id: Uuid) -> Result<()> {
    let pending = pending_key(id);
    let response = response_key(id);
    store.remove(&[pending.as_str(), response.as_str()]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use serde_json::json;

    fn vault() -> VaultRecord {
        VaultRecord::new(&[1, 2, 3], &[4; 16], &[5; 16])
    }

    #[tokio::test]
    async fn test_initialize_writes_all_records() {
        let store = MemoryStore::new();
        assert!(!vault_exists(&store).await.unwrap());

        let accounts = vec![PersistedAccount {
            name: "Account 1".into(),
            account: "deadbeef".into(),
        }];
        initialize(&store, &vault(), &accounts, &Network::EthereumMainnet)
            .await
            .unwrap();

        assert_eq!(load_vault(&store).await.unwrap(), Some(vault()));
        assert_eq!(load_accounts(&store).await.unwrap(), accounts);
        assert!(load_saved(&store).await.unwrap().is_empty());
        assert_eq!(
            store.get(NETWORK_KEY).await.unwrap(),
            Some(json!("Ethereum_Mainnet"))
        );
    }

    #[tokio::test]
    async fn test_missing_network_defaults_to_mainnet() {
        let store = MemoryStore::new();
        assert_eq!(load_network(&store).await.unwrap(), Network::EthereumMainnet);
        store
            .set(vec![(NETWORK_KEY.into(), json!("Nonsense"))])
            .await
            .unwrap();
        assert_eq!(load_network(&store).await.unwrap(), Network::EthereumMainnet);
    }

    #[tokio::test]
    async fn test_upsert_custom_chain_replaces_same_id() {
        let store = MemoryStore::new();
        let mut chain = CustomChain {
            chain_id: "0x89".into(),
            chain_name: "Polygon".into(),
            rpc_urls: vec![],
            native_currency: None,
            block_explorer_urls: vec![],
        };
        upsert_custom_chain(&store, &chain).await.unwrap();
        chain.chain_name = "Polygon PoS".into();
        upsert_custom_chain(&store, &chain).await.unwrap();

        let chains = load_custom_chains(&store).await.unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].chain_name, "Polygon PoS");
    }

    #[tokio::test]
    async fn test_approval_records_are_keyed_and_cleared_together() {
        let store = MemoryStore::new();
        let first = PendingApprovalRequest {
            approval_id: Uuid::new_v4(),
            request_id: 1,
            kind: ApprovalKind::Sign,
            payload: json!(["hello"]),
            created_at_ms: 10,
        };
        let second = PendingApprovalRequest {
            approval_id: Uuid::new_v4(),
            request_id: 2,
            kind: ApprovalKind::Transaction,
            payload: json!([{}]),
            created_at_ms: 5,
        };
        save_pending_approval(&store, &first).await.unwrap();
        save_pending_approval(&store, &second).await.unwrap();
        save_approval_response(&store, first.approval_id, RequestResponse { approved: true })
            .await
            .unwrap();

        let pending = list_pending_approvals(&store).await.unwrap();
        assert_eq!(pending, vec![second.clone(), first.clone()]);

        clear_approval(&store, first.approval_id).await.unwrap();
        assert!(load_pending_approval(&store, first.approval_id)
            .await
            .unwrap()
            .is_none());
        assert!(load_approval_response(&store, first.approval_id)
            .await
            .unwrap()
            .is_none());
        assert!(load_pending_approval(&store, second.approval_id)
            .await
            .unwrap()
            .is_some());
    }
}
