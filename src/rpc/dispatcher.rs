/// Turns one `WalletRequest` into exactly one `WalletResponse`.
///
/// Handlers return typed errors; `dispatch` is the boundary that converts
/// them into the response's `error` code, so every request id the page
/// minted gets an answer.
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::approval::ApprovalBroker;
use super::methods::RpcMethod;
use crate::crypto::sign;
use crate::error::{Result, WalletError};
use crate::relay::hub::{Host, PopupPage, PopupRequest};
use crate::relay::protocol::{WalletRequest, WalletResponse};
use crate::state::models::{parse_chain_id, ApprovalKind, CustomChain};
use crate::wallet::service::WalletService;

pub struct RpcDispatcher {
    service: Arc<WalletService>,
    broker: Arc<ApprovalBroker>,
    host: Arc<dyn Host>,
}

impl RpcDispatcher {
    pub fn new(service: Arc<WalletService>, broker: Arc<ApprovalBroker>, host: Arc<dyn Host>) -> Self {
        Self {
            service,
            broker,
            host,
        }
    }

    pub async fn dispatch(&self, request: WalletRequest) -> WalletResponse {
        let id = request.id;
        match self.handle(&request).await {
            Ok(result) => {
                debug!(id, method = %request.method, "Request handled");
                WalletResponse::ok(id, result)
            }
            Err(e) => {
                if e.is_user_decision() {
                    info!(id, method = %request.method, code = e.code(), "Request declined");
                } else {
                    warn!(id, method = %request.method, error = %e, "Request failed");
                }
                WalletResponse::from_error(id, &e)
            }
        }
    }

    async fn handle(&self, request: &WalletRequest) -> Result<Value> {
        let method: RpcMethod = request.method.parse()?;
        if method.requires_unlock() && !self.service.is_unlocked().await {
            return Err(WalletError::WalletLocked);
        }

        match method {
            RpcMethod::RequestAccounts => self.request_accounts().await,
            RpcMethod::Accounts => Ok(json!(self.service.exposed_accounts().await)),
            RpcMethod::ChainId => Ok(json!(self.service.chain_id().await)),
            RpcMethod::IsUnlocked => Ok(json!(self.service.is_unlocked().await)),
            RpcMethod::SendTransaction => {
                let mut tx = param(request, 0)?
                    .as_object()
                    .cloned()
                    .ok_or_else(|| WalletError::InvalidParams("transaction must be an object".into()))?;
                let from = tx.get("from").and_then(Value::as_str);
                let from = self.service.ensure_can_sign(from).await?;
                tx.insert("from".into(), json!(from));
                let tx = Value::Object(tx);
                self.approve(ApprovalKind::Transaction, request.id, tx.clone())
                    .await?;
                Ok(json!(self.service.send_transaction(&tx).await?))
            }
            RpcMethod::PersonalSign => {
                let message = param_str(request, 0)?;
                let address = request.params.get(1).and_then(Value::as_str);
                let address = self.service.ensure_can_sign(address).await?;
                self.approve(
                    ApprovalKind::Sign,
                    request.id,
                    json!({ "message": message, "address": address }),
                )
                .await?;
                Ok(json!(
                    self.service
                        .personal_sign(message, Some(&address))
                        .await?
                ))
            }
            RpcMethod::SignTypedDataV4 => {
                let address = param_str(request, 0)?;
                let typed_data = param(request, 1)?;
                sign::parse_typed_data(typed_data)?;
                let address = self.service.ensure_can_sign(Some(address)).await?;
                self.approve(
                    ApprovalKind::SignTypedData,
                    request.id,
                    json!({ "address": address, "typedData": typed_data }),
                )
                .await?;
                Ok(json!(
                    self.service
                        .sign_typed_data(Some(&address), typed_data)
                        .await?
                ))
            }
            RpcMethod::SwitchChain => {
                let chain_id = param(request, 0)?
                    .get("chainId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| WalletError::InvalidParams("missing chainId".into()))?;
                self.service.switch_chain(chain_id).await?;
                Ok(Value::Null)
            }
            RpcMethod::AddChain => {
                let chain: CustomChain = serde_json::from_value(param(request, 0)?.clone())
                    .map_err(|e| WalletError::InvalidParams(e.to_string()))?;
                if parse_chain_id(&chain.chain_id).is_none() {
                    return Err(WalletError::InvalidParams(format!(
                        "bad chain id: {}",
                        chain.chain_id
                    )));
                }
                self.approve(ApprovalKind::AddChain, request.id, json!(chain))
                    .await?;
                self.service.add_custom_chain(chain).await?;
                Ok(Value::Null)
            }
        }
    }

    /// Connect: unlocks through the popup if needed, then exposes the
    /// selected account.
    async fn request_accounts(&self) -> Result<Value> {
        if !self.service.is_unlocked().await {
            let config = self.service.config();
            self.host
                .open_popup(PopupRequest::new(
                    PopupPage::Unlock,
                    config.popup_width,
                    config.popup_height,
                ))
                .await?;
            if !self
                .service
                .wait_until_unlocked(config.unlock_wait_timeout())
                .await
            {
                return Err(WalletError::WalletLocked);
            }
        }
        let accounts = self.service.exposed_accounts().await;
        if accounts.is_empty() {
            return Err(WalletError::NoAccountsAvailable);
        }
        Ok(json!(accounts))
    }

    async fn approve(&self, kind: ApprovalKind, request_id: u64, payload: Value) -> Result<()> {
        self.broker.request_approval(kind, request_id, payload).await
    }
}

fn param(request: &WalletRequest, index: usize) -> Result<&Value> {
    request
        .params
        .get(index)
        .filter(|v| !v.is_null())
        .ok_or_else(|| WalletError::InvalidParams(format!("missing param {index}")))
}

fn param_str(request: &WalletRequest, index: usize) -> Result<&str> {
    param(request, index)?
        .as_str()
        .ok_or_else(|| WalletError::InvalidParams(format!("param {index} must be a string")))
}
