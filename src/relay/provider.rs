/// Page-context provider.
///
/// Mints monotonically increasing request ids, tracks one pending entry
/// per id and settles it on the first matching response. Entries are
/// dropped when their timeout fires; a response for an id that is not
/// pending (never minted here, or already timed out) is ignored.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::protocol::{PageMessage, WalletRequest, WalletResponse};
use crate::error::{Result, WalletError};

/// Events surfaced to dApp listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Connect { chain_id: String },
    Disconnect,
    ChainChanged(String),
    AccountsChanged(Vec<String>),
}

#[derive(Debug, Default)]
struct Mirror {
    chain_id: Option<String>,
    selected_address: Option<String>,
    connected: bool,
}

pub struct PageProvider {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<WalletResponse>>>,
    outbound: mpsc::UnboundedSender<PageMessage>,
    events: broadcast::Sender<ProviderEvent>,
    mirror: RwLock<Mirror>,
    timeout: Duration,
}

impl PageProvider {
    /// Returns the provider and the stream of messages it posts to the window.
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<PageMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let provider = Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound,
            events,
            mirror: RwLock::new(Mirror::default()),
            timeout,
        };
        (provider, rx)
    }

    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending_map()?.insert(id, tx);

        let message = PageMessage::WalletRequest(WalletRequest::new(id, method, params));
        if self.outbound.send(message).is_err() {
            self.drop_pending(id);
            return Err(WalletError::Transport("page channel closed".into()));
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                self.drop_pending(id);
                return Err(WalletError::Transport("request dropped".into()));
            }
            Err(_) => {
                self.drop_pending(id);
                warn!(id, method, "Request timed out");
                return Err(WalletError::RequestTimeout);
            }
        };
        let result = response.into_result()?;

        if method == "eth_requestAccounts" || method == "eth_accounts" {
            self.note_accounts(&result);
        }
        if method == "eth_chainId" {
            if let Some(chain_id) = result.as_str() {
                self.write_mirror(|m| m.chain_id = Some(chain_id.to_string()));
            }
        }
        Ok(result)
    }

    /// Connect shorthand. Resolves to the exposed accounts.
    pub async fn enable(&self) -> Result<Vec<String>> {
        let accounts = self.request("eth_requestAccounts", vec![]).await?;
        serde_json::from_value(accounts).map_err(WalletError::from)
    }

    pub async fn is_unlocked(&self) -> Result<bool> {
        Ok(self
            .request("wallet_isUnlocked", vec![])
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    /// Feeds a message seen on the window into the provider.
    pub fn handle_message(&self, message: PageMessage) {
        match message {
            PageMessage::WalletResponse(response) => {
                let waiter = self.pending_map().ok().and_then(|mut p| p.remove(&response.id));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!(id = response.id, "Ignoring response for unknown id"),
                }
            }
            PageMessage::WalletUnlocked => {
                let chain_id = self.chain_id().unwrap_or_else(|| "0x1".to_string());
                self.write_mirror(|m| m.connected = true);
                self.emit(ProviderEvent::Connect { chain_id });
            }
            PageMessage::WalletLocked => {
                self.write_mirror(|m| {
                    m.connected = false;
                    m.selected_address = None;
                });
                self.emit(ProviderEvent::Disconnect);
                self.emit(ProviderEvent::AccountsChanged(vec![]));
            }
            PageMessage::ChainChanged { chain_id } => {
                self.write_mirror(|m| m.chain_id = Some(chain_id.clone()));
                self.emit(ProviderEvent::ChainChanged(chain_id));
            }
            PageMessage::AccountsChanged { accounts } => {
                self.write_mirror(|m| m.selected_address = accounts.first().cloned());
                self.emit(ProviderEvent::AccountsChanged(accounts));
            }
            PageMessage::WalletRequest(_) => {}
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    pub fn chain_id(&self) -> Option<String> {
        self.mirror.read().ok().and_then(|m| m.chain_id.clone())
    }

    pub fn selected_address(&self) -> Option<String> {
        self.mirror.read().ok().and_then(|m| m.selected_address.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.mirror.read().map(|m| m.connected).unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_map().map(|p| p.len()).unwrap_or(0)
    }

    fn note_accounts(&self, result: &Value) {
        let first = result
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string);
        self.write_mirror(|m| {
            m.connected = first.is_some();
            m.selected_address = first;
        });
    }

    fn emit(&self, event: ProviderEvent) {
        // no listeners is fine
        let _ = self.events.send(event);
    }

    fn write_mirror(&self, f: impl FnOnce(&mut Mirror)) {
        if let Ok(mut mirror) = self.mirror.write() {
            f(&mut mirror);
        }
    }

    fn pending_map(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<WalletResponse>>>> {
        self.pending
            .lock()
            .map_err(|_| WalletError::Transport("pending map poisoned".into()))
    }

    fn drop_pending(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn request_id(message: PageMessage) -> u64 {
        match message {
            PageMessage::WalletRequest(r) => r.id,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_responses_match_by_id() {
        let (provider, mut window) = PageProvider::new(Duration::from_secs(5));
        let provider = Arc::new(provider);

        let a = {
            let p = provider.clone();
            tokio::spawn(async move { p.request("eth_chainId", vec![]).await })
        };
        let id_a = request_id(window.recv().await.unwrap());
        let b = {
            let p = provider.clone();
            tokio::spawn(async move { p.request("wallet_isUnlocked", vec![]).await })
        };
        let id_b = request_id(window.recv().await.unwrap());
        assert!(id_b > id_a);

        provider.handle_message(PageMessage::WalletResponse(WalletResponse::ok(id_b, json!(true))));
        assert_eq!(b.await.unwrap().unwrap(), json!(true));
        assert_eq!(provider.pending_count(), 1);

        provider.handle_message(PageMessage::WalletResponse(WalletResponse::ok(id_a, json!("0x1"))));
        assert_eq!(a.await.unwrap().unwrap(), json!("0x1"));
        assert_eq!(provider.chain_id().as_deref(), Some("0x1"));
    }

    #[tokio::test]
    async fn test_unknown_id_is_ignored() {
        let (provider, _window) = PageProvider::new(Duration::from_secs(5));
        provider.handle_message(PageMessage::WalletResponse(WalletResponse::ok(999, json!(1))));
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (provider, _window) = PageProvider::new(Duration::from_millis(20));
        let err = provider.request("eth_chainId", vec![]).await.unwrap_err();
        assert!(matches!(err, WalletError::RequestTimeout));
        assert!(err.is_transport());
        assert_eq!(provider.pending_count(), 0);

        // a late answer for the expired id is dropped
        provider.handle_message(PageMessage::WalletResponse(WalletResponse::ok(1, json!("0x1"))));
        assert_eq!(provider.chain_id(), None);
    }

    #[tokio::test]
    async fn test_error_response_rejects() {
        let (provider, mut window) = PageProvider::new(Duration::from_secs(5));
        let provider = Arc::new(provider);
        let task = {
            let p = provider.clone();
            tokio::spawn(async move { p.request("personal_sign", vec![json!("hi")]).await })
        };
        let id = request_id(window.recv().await.unwrap());
        provider.handle_message(PageMessage::WalletResponse(WalletResponse::err(id, "ApprovalRejected")));
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_user_decision());
    }

    #[tokio::test]
    async fn test_events_update_mirror() {
        let (provider, _window) = PageProvider::new(Duration::from_secs(5));
        let mut events = provider.subscribe();

        provider.handle_message(PageMessage::ChainChanged {
            chain_id: "0xaa36a7".into(),
        });
        provider.handle_message(PageMessage::WalletUnlocked);
        provider.handle_message(PageMessage::AccountsChanged {
            accounts: vec!["0xabc".into()],
        });

        assert_eq!(events.recv().await.unwrap(), ProviderEvent::ChainChanged("0xaa36a7".into()));
        assert_eq!(
            events.recv().await.unwrap(),
            ProviderEvent::Connect {
                chain_id: "0xaa36a7".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ProviderEvent::AccountsChanged(vec!["0xabc".into()])
        );
        assert!(provider.is_connected());
        assert_eq!(provider.selected_address().as_deref(), Some("0xabc"));

        provider.handle_message(PageMessage::WalletLocked);
        assert_eq!(events.recv().await.unwrap(), ProviderEvent::Disconnect);
        assert!(!provider.is_connected());
        assert_eq!(provider.selected_address(), None);
    }
}
