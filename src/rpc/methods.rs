use std::fmt;
use std::str::FromStr;

use crate::error::WalletError;
use crate::state::models::ApprovalKind;

/// Provider methods the background answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    RequestAccounts,
    Accounts,
    ChainId,
    IsUnlocked,
    SendTransaction,
    PersonalSign,
    SignTypedDataV4,
    SwitchChain,
    AddChain,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 9] = [
        Self::RequestAccounts,
        Self::Accounts,
        Self::ChainId,
        Self::IsUnlocked,
        Self::SendTransaction,
        Self::PersonalSign,
        Self::SignTypedDataV4,
        Self::SwitchChain,
        Self::AddChain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestAccounts => "eth_requestAccounts",
            Self::Accounts => "eth_accounts",
            Self::ChainId => "eth_chainId",
            Self::IsUnlocked => "wallet_isUnlocked",
            Self::SendTransaction => "eth_sendTransaction",
            Self::PersonalSign => "personal_sign",
            Self::SignTypedDataV4 => "eth_signTypedData_v4",
            Self::SwitchChain => "wallet_switchEthereumChain",
            Self::AddChain => "wallet_addEthereumChain",
        }
    }

    /// Methods that act on key material and fail fast while locked.
    pub fn requires_unlock(&self) -> bool {
        matches!(
            self,
            Self::SendTransaction | Self::PersonalSign | Self::SignTypedDataV4
        )
    }

    /// The confirmation a method needs before it runs, if any.
    pub fn approval_kind(&self) -> Option<ApprovalKind> {
        match self {
            Self::SendTransaction => Some(ApprovalKind::Transaction),
            Self::PersonalSign => Some(ApprovalKind::Sign),
            Self::SignTypedDataV4 => Some(ApprovalKind::SignTypedData),
            Self::AddChain => Some(ApprovalKind::AddChain),
            _ => None,
        }
    }
}

impl FromStr for RpcMethod {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| WalletError::UnsupportedMethod(s.to_string()))
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
