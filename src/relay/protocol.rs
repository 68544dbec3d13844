/// Wire messages of the three-hop relay.
///
/// `PageMessage` travels as a window message between the page provider and
/// the content script. `BackgroundMessage` travels over the extension's
/// runtime messaging between the content script (or popup) and the
/// background. Field names are the public contract; do not rename.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::sensitive::SecretString;
use crate::error::WalletError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub id: u64,
}

impl WalletRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            id,
        }
    }
}

/// Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalletResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn from_error(id: u64, error: &WalletError) -> Self {
        Self::err(id, error.code())
    }

    pub fn into_result(self) -> crate::error::Result<Value> {
        match self.error {
            Some(code) => Err(WalletError::from_code(&code)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Background-originated state change, fanned out to every open page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletEvent {
    WalletUnlocked,
    WalletLocked,
    ChainChanged {
        #[serde(rename = "chainId")]
        chain_id: String,
    },
    AccountsChanged {
        accounts: Vec<String>,
    },
}

/// A window message seen by the page provider or the content script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    WalletRequest(WalletRequest),
    WalletResponse(WalletResponse),
    WalletUnlocked,
    WalletLocked,
    ChainChanged {
        #[serde(rename = "chainId")]
        chain_id: String,
    },
    AccountsChanged {
        accounts: Vec<String>,
    },
}

impl From<WalletEvent> for PageMessage {
    fn from(event: WalletEvent) -> Self {
        match event {
            WalletEvent::WalletUnlocked => Self::WalletUnlocked,
            WalletEvent::WalletLocked => Self::WalletLocked,
            WalletEvent::ChainChanged { chain_id } => Self::ChainChanged { chain_id },
            WalletEvent::AccountsChanged { accounts } => Self::AccountsChanged { accounts },
        }
    }
}

/// Messages the background accepts.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundMessage {
    UnlockWallet {
        password: SecretString,
    },
    IsWalletUnlocked,
    LockWallet,
    EnableWallet,
    ApprovalDecision {
        #[serde(rename = "approvalId")]
        approval_id: Uuid,
        approved: bool,
    },
    PendingApprovals,
    #[serde(alias = "ETH_REQUEST")]
    WalletRequest(WalletRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let msg: PageMessage = serde_json::from_value(json!({
            "type": "WALLET_REQUEST",
            "method": "eth_chainId",
            "id": 7
        }))
        .unwrap();
        assert_eq!(
            msg,
            PageMessage::WalletRequest(WalletRequest::new(7, "eth_chainId", vec![]))
        );
    }

    #[test]
    fn test_response_omits_unset_side() {
        let ok = serde_json::to_value(PageMessage::WalletResponse(WalletResponse::ok(
            3,
            json!("0x1"),
        )))
        .unwrap();
        assert_eq!(ok, json!({"type": "WALLET_RESPONSE", "id": 3, "result": "0x1"}));

        let err = serde_json::to_value(WalletResponse::err(4, "ApprovalRejected")).unwrap();
        assert_eq!(err, json!({"id": 4, "error": "ApprovalRejected"}));
    }

    #[test]
    fn test_event_wire_shapes() {
        assert_eq!(
            serde_json::to_value(WalletEvent::WalletLocked).unwrap(),
            json!({"type": "WALLET_LOCKED"})
        );
        assert_eq!(
            serde_json::to_value(WalletEvent::ChainChanged {
                chain_id: "0xaa36a7".into()
            })
            .unwrap(),
            json!({"type": "CHAIN_CHANGED", "chainId": "0xaa36a7"})
        );
        let page: PageMessage = WalletEvent::AccountsChanged {
            accounts: vec!["0xabc".into()],
        }
        .into();
        assert_eq!(
            serde_json::to_value(page).unwrap(),
            json!({"type": "ACCOUNTS_CHANGED", "accounts": ["0xabc"]})
        );
    }

    #[test]
    fn test_background_messages() {
        let unlock: BackgroundMessage =
            serde_json::from_value(json!({"type": "UNLOCK_WALLET", "password": "pw123"})).unwrap();
        match unlock {
            BackgroundMessage::UnlockWallet { password } => assert_eq!(password.expose(), "pw123"),
            other => panic!("unexpected {other:?}"),
        }

        let legacy: BackgroundMessage = serde_json::from_value(json!({
            "type": "ETH_REQUEST",
            "method": "eth_accounts",
            "params": [],
            "id": 1
        }))
        .unwrap();
        assert!(matches!(legacy, BackgroundMessage::WalletRequest(_)));

        let decision: BackgroundMessage = serde_json::from_value(json!({
            "type": "APPROVAL_DECISION",
            "approvalId": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "approved": false
        }))
        .unwrap();
        assert!(matches!(
            decision,
            BackgroundMessage::ApprovalDecision { approved: false, .. }
        ));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(
            WalletResponse::ok(1, json!([])).into_result().unwrap(),
            json!([])
        );
        let err = WalletResponse::err(1, "WalletLocked").into_result().unwrap_err();
        assert!(matches!(err, WalletError::WalletLocked));
    }
}
