/// Background entry point.
///
/// Wires the wallet service, the approval broker and the dispatcher
/// together and answers every background message kind. The popup and the
/// content forwarder both talk to it through `BackgroundPort`.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, WalletError};
use crate::relay::forwarder::BackgroundPort;
use crate::relay::hub::Host;
use crate::relay::protocol::{BackgroundMessage, WalletResponse};
use crate::rpc::approval::ApprovalBroker;
use crate::rpc::dispatcher::RpcDispatcher;
use crate::wallet::service::WalletService;

pub struct Background {
    service: Arc<WalletService>,
    broker: Arc<ApprovalBroker>,
    dispatcher: RpcDispatcher,
}

impl Background {
    pub fn new(service: Arc<WalletService>, host: Arc<dyn Host>) -> Self {
        let config = service.config();
        let broker = Arc::new(ApprovalBroker::new(
            service.store(),
            host.clone(),
            service.clock(),
            config.approval_timeout(),
            (config.popup_width, config.popup_height),
        ));
        let dispatcher = RpcDispatcher::new(service.clone(), broker.clone(), host);
        Self {
            service,
            broker,
            dispatcher,
        }
    }

    pub fn service(&self) -> &Arc<WalletService> {
        &self.service
    }

    pub fn broker(&self) -> &Arc<ApprovalBroker> {
        &self.broker
    }

    /// Answers one message. Failures come back as `{success: false, error}`
    /// so the sender always gets a reply.
    pub async fn handle(&self, message: BackgroundMessage) -> Value {
        if let BackgroundMessage::WalletRequest(request) = message {
            let id = request.id;
            let response = self.dispatcher.dispatch(request).await;
            return serde_json::to_value(&response).unwrap_or_else(|e| {
                warn!(id, error = %e, "Response not serializable");
                json!(WalletResponse::from_error(id, &WalletError::from(e)))
            });
        }
        match self.handle_control(message).await {
            Ok(reply) => reply,
            Err(e) => json!({ "success": false, "error": e.code() }),
        }
    }

    async fn handle_control(&self, message: BackgroundMessage) -> Result<Value> {
        match message {
            BackgroundMessage::UnlockWallet { password } => {
                let success = self.service.unlock_wallet(password.expose()).await?;
                Ok(json!({ "success": success }))
            }
            BackgroundMessage::IsWalletUnlocked => {
                let unlocked = self.service.is_unlocked().await;
                let mut reply = json!({ "unlocked": unlocked });
                if unlocked {
                    reply["snapshot"] = serde_json::to_value(self.service.snapshot().await?)?;
                }
                Ok(reply)
            }
            BackgroundMessage::LockWallet => {
                self.service.lock().await;
                Ok(json!({ "success": true }))
            }
            BackgroundMessage::EnableWallet => {
                if !self.service.is_unlocked().await {
                    return Ok(json!({ "success": false }));
                }
                let account = self.service.selected_account().await?;
                Ok(json!({ "success": true, "address": account.public_key }))
            }
            BackgroundMessage::ApprovalDecision {
                approval_id,
                approved,
            } => {
                self.broker.submit_decision(approval_id, approved).await?;
                Ok(json!({ "success": true }))
            }
            BackgroundMessage::PendingApprovals => {
                Ok(json!({ "pending": self.broker.pending().await? }))
            }
            BackgroundMessage::WalletRequest(_) => Err(WalletError::InvalidParams(
                "wallet requests go through the dispatcher".into(),
            )),
        }
    }

    /// Locks the wallet once its unlock window lapses.
    pub fn spawn_expiry_task(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.service.clone();
        let period = service.config().expiry_check_interval();
        info!(period_secs = period.as_secs(), "Starting expiry task");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if service.check_expiry().await {
                    debug!("Expiry task locked the wallet");
                }
            }
        })
    }
}

#[async_trait]
impl BackgroundPort for Background {
    async fn send(&self, message: BackgroundMessage) -> Result<Value> {
        Ok(self.handle(message).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::forwarder::ContentForwarder;
    use crate::relay::hub::{ChannelHost, PopupRequest, TabId};
    use crate::relay::protocol::WalletEvent;
    use crate::relay::provider::{PageProvider, ProviderEvent};
    use crate::testing::{Fixture, FIRST_ADDRESS, PASSWORD};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn background(fx: &Fixture) -> (Arc<Background>, UnboundedReceiver<PopupRequest>) {
        let (host, popups) = ChannelHost::new();
        (Arc::new(Background::new(fx.service.clone(), Arc::new(host))), popups)
    }

    fn message(value: Value) -> BackgroundMessage {
        serde_json::from_value(value).unwrap()
    }

    /// provider -> forwarder -> background, and back.
    fn page(background: Arc<Background>, tab: TabId) -> Arc<PageProvider> {
        let timeout = background.service().config().request_timeout();
        let (provider, outbound) = PageProvider::new(timeout);
        let provider = Arc::new(provider);
        let (window_tx, mut window_rx) = tokio::sync::mpsc::unbounded_channel();
        let events_rx = background.service().hub().connect(tab);
        let forwarder = Arc::new(ContentForwarder::new(background, window_tx));
        tokio::spawn(forwarder.run(outbound, events_rx));
        let sink = provider.clone();
        tokio::spawn(async move {
            while let Some(message) = window_rx.recv().await {
                sink.handle_message(message);
            }
        });
        provider
    }

    #[tokio::test]
    async fn test_locked_accounts_query_end_to_end() {
        let fx = Fixture::initialized().await;
        fx.service.lock().await;
        let (bg, _popups) = background(&fx);
        let provider = page(bg, 1);

        let accounts = provider.request("eth_accounts", vec![]).await.unwrap();
        assert_eq!(accounts, json!([]));
        assert_eq!(provider.request("eth_chainId", vec![]).await.unwrap(), json!("0x1"));
        assert!(!provider.is_unlocked().await.unwrap());
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unlocked_accounts_query_end_to_end() {
        let fx = Fixture::initialized().await;
        let (bg, _popups) = background(&fx);
        let provider = page(bg, 1);
        let accounts = provider.request("eth_accounts", vec![]).await.unwrap();
        assert_eq!(accounts, json!([FIRST_ADDRESS]));
        assert_eq!(provider.selected_address().as_deref(), Some(FIRST_ADDRESS));
        assert_eq!(provider.enable().await.unwrap(), vec![FIRST_ADDRESS.to_string()]);
        assert!(provider.is_connected());
    }

    #[tokio::test]
    async fn test_lock_reaches_every_tab() {
        let fx = Fixture::initialized().await;
        let (bg, _popups) = background(&fx);
        let first = page(bg.clone(), 1);
        let second = page(bg.clone(), 2);
        let mut first_events = first.subscribe();
        let mut second_events = second.subscribe();

        let reply = bg.handle(message(json!({"type": "LOCK_WALLET"}))).await;
        assert_eq!(reply, json!({"success": true}));

        for events in [&mut first_events, &mut second_events] {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event, ProviderEvent::Disconnect);
        }
    }

    #[tokio::test]
    async fn test_unlock_messages() {
        let fx = Fixture::initialized().await;
        let (bg, _popups) = background(&fx);
        bg.handle(message(json!({"type": "LOCK_WALLET"}))).await;

        let status = bg.handle(message(json!({"type": "IS_WALLET_UNLOCKED"}))).await;
        assert_eq!(status, json!({"unlocked": false}));

        let wrong = bg
            .handle(message(json!({"type": "UNLOCK_WALLET", "password": "nope"})))
            .await;
        assert_eq!(wrong, json!({"success": false}));
        let right = bg
            .handle(message(json!({"type": "UNLOCK_WALLET", "password": PASSWORD})))
            .await;
        assert_eq!(right, json!({"success": true}));

        let status = bg.handle(message(json!({"type": "IS_WALLET_UNLOCKED"}))).await;
        assert_eq!(status["unlocked"], json!(true));
        assert_eq!(status["snapshot"]["chainId"], json!("0x1"));
        assert_eq!(status["snapshot"]["accounts"][0]["name"], json!("Account 1"));
        assert!(status.to_string().find("privateKey").is_none());

        let enabled = bg.handle(message(json!({"type": "ENABLE_WALLET"}))).await;
        assert_eq!(enabled, json!({"success": true, "address": FIRST_ADDRESS}));
    }

    #[tokio::test]
    async fn test_unlock_before_init_reports_code() {
        let fx = Fixture::new();
        let (bg, _popups) = background(&fx);
        let reply = bg
            .handle(message(json!({"type": "UNLOCK_WALLET", "password": PASSWORD})))
            .await;
        assert_eq!(reply, json!({"success": false, "error": "NotInitialized"}));
    }

    #[tokio::test]
    async fn test_legacy_request_tag() {
        let fx = Fixture::initialized().await;
        let (bg, _popups) = background(&fx);
        let reply = bg
            .handle(message(json!({"type": "ETH_REQUEST", "method": "eth_chainId", "id": 9})))
            .await;
        assert_eq!(reply, json!({"id": 9, "result": "0x1"}));
    }

    #[tokio::test]
    async fn test_expiry_task_locks_wallet() {
        let fx = Fixture::initialized().await;
        let (bg, _popups) = background(&fx);
        let mut tab = fx.service.hub().connect(1);

        fx.clock.advance(fx.service.config().unlock_duration_ms);
        let task = bg.spawn_expiry_task();
        let event = tokio::time::timeout(Duration::from_secs(5), tab.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, WalletEvent::WalletLocked);
        task.abort();
    }
}
