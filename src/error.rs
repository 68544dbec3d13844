use thiserror::Error;

use crate::state::models::ApprovalKind;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Wallet is locked")]
    WalletLocked,

    #[error("Unlock failed: wrong password")]
    WrongPassword,

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("No accounts available")]
    NoAccountsAvailable,

    #[error("{0} rejected by user")]
    ApprovalRejected(ApprovalKind),

    #[error("Approval timed out")]
    ApprovalTimedOut,

    #[error("Account with this private key already exists")]
    DuplicateAccount,

    #[error("Saved address with this {0} already exists")]
    DuplicateSavedAddress(&'static str),

    #[error("The last remaining account cannot be deleted")]
    LastAccountUndeletable,

    #[error("Account doesn't exist")]
    AccountNotFound,

    #[error("Saved address doesn't exist")]
    SavedAddressNotFound,

    #[error("Account is not part of the registry")]
    NotInRegistry,

    #[error("Key-pair derivation failed")]
    KeypairDerivationFailed,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Wallet has not been initialized")]
    NotInitialized,

    #[error("Wallet is already initialized")]
    AlreadyInitialized,

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Watch-only account cannot sign")]
    WatchOnlyAccount,

    #[error("Unrecognized chain id: {0}")]
    UnknownChain(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Extension communication failed: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A failure reported by the background, seen from the page side.
    #[error("Request failed: {0}")]
    Remote(String),
}

impl WalletError {
    /// Stable identifier sent to pages in the `error` field of a response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WalletLocked => "WalletLocked",
            Self::WrongPassword => "WrongPassword",
            Self::UnsupportedMethod(_) => "UnsupportedMethod",
            Self::NoAccountsAvailable => "NoAccountsAvailable",
            Self::ApprovalRejected(_) => "ApprovalRejected",
            Self::ApprovalTimedOut => "ApprovalTimedOut",
            Self::DuplicateAccount => "DuplicateAccount",
            Self::DuplicateSavedAddress(_) => "DuplicateSavedAddress",
            Self::LastAccountUndeletable => "LastAccountUndeletable",
            Self::AccountNotFound => "AccountNotFound",
            Self::SavedAddressNotFound => "SavedAddressNotFound",
            Self::NotInRegistry => "NotInRegistry",
            Self::KeypairDerivationFailed => "KeypairDerivationFailed",
            Self::DecryptionFailed(_) => "DecryptionFailed",
            Self::RequestTimeout => "RequestTimeout",
            Self::NotInitialized => "NotInitialized",
            Self::AlreadyInitialized => "AlreadyInitialized",
            Self::InvalidParams(_) => "InvalidParams",
            Self::InvalidMnemonic(_) => "InvalidMnemonic",
            Self::WatchOnlyAccount => "WatchOnlyAccount",
            Self::UnknownChain(_) => "UnknownChain",
            Self::Encryption(_) => "EncryptionFailed",
            Self::KeyDerivation(_) => "KeyDerivationFailed",
            Self::Signing(_) => "SigningFailed",
            Self::Storage(_) => "StorageError",
            Self::Provider(_) => "ProviderError",
            Self::Transport(_) => "TransportError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Remote(_) => "RemoteError",
        }
    }

    /// Rebuilds an error from the code carried in a response's `error` field.
    ///
    /// Codes whose variant carries detail come back as `Remote(code)`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "WalletLocked" => Self::WalletLocked,
            "WrongPassword" => Self::WrongPassword,
            "NoAccountsAvailable" => Self::NoAccountsAvailable,
            "ApprovalTimedOut" => Self::ApprovalTimedOut,
            "RequestTimeout" => Self::RequestTimeout,
            "DuplicateAccount" => Self::DuplicateAccount,
            "LastAccountUndeletable" => Self::LastAccountUndeletable,
            "AccountNotFound" => Self::AccountNotFound,
            "NotInRegistry" => Self::NotInRegistry,
            "KeypairDerivationFailed" => Self::KeypairDerivationFailed,
            "WatchOnlyAccount" => Self::WatchOnlyAccount,
            "NotInitialized" => Self::NotInitialized,
            "UnsupportedMethod" => Self::UnsupportedMethod(String::new()),
            "ApprovalRejected" => Self::Remote(code.to_string()),
            "TransportError" => Self::Transport(code.to_string()),
            "ProviderError" => Self::Provider(code.to_string()),
            other => Self::Remote(other.to_string()),
        }
    }

    /// Failures caused by a user decision or user input. Retrying without
    /// user involvement will not change the outcome.
    pub fn is_user_decision(&self) -> bool {
        matches!(
            self,
            Self::WrongPassword
                | Self::ApprovalRejected(_)
                | Self::WalletLocked
                | Self::ApprovalTimedOut
        ) || matches!(self, Self::Remote(code) if code == "ApprovalRejected")
    }

    /// Failures of the message path itself; the dApp may retry these.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout
                | Self::UnsupportedMethod(_)
                | Self::Transport(_)
                | Self::Provider(_)
        )
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            WalletError::ApprovalRejected(ApprovalKind::Transaction).code(),
            "ApprovalRejected"
        );
        assert_eq!(
            WalletError::UnsupportedMethod("eth_foo".into()).code(),
            "UnsupportedMethod"
        );
        assert_eq!(WalletError::RequestTimeout.code(), "RequestTimeout");
    }

    #[test]
    fn test_user_and_transport_failures_are_disjoint() {
        let user = WalletError::ApprovalRejected(ApprovalKind::Sign);
        assert!(user.is_user_decision());
        assert!(!user.is_transport());

        let transport = WalletError::RequestTimeout;
        assert!(transport.is_transport());
        assert!(!transport.is_user_decision());
    }

    #[test]
    fn test_from_code_keeps_classification() {
        assert!(WalletError::from_code("ApprovalRejected").is_user_decision());
        assert!(WalletError::from_code("WalletLocked").is_user_decision());
        assert!(WalletError::from_code("RequestTimeout").is_transport());
        assert!(WalletError::from_code("UnsupportedMethod").is_transport());
        assert_eq!(WalletError::from_code("WeirdThing").code(), "RemoteError");
    }

    #[test]
    fn test_rejection_message_names_the_kind() {
        let err = WalletError::ApprovalRejected(ApprovalKind::AddChain);
        assert_eq!(err.to_string(), "Chain addition rejected by user");
    }
}
