/// Record types for the wallet store and the values exchanged with UIs.
///
/// Field names serialize in camelCase to match what the extension pages
/// read from storage.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::sensitive::SecretString;
use crate::error::{Result, WalletError};

/// `derivedAccountNum` of an account imported from a raw private key.
pub const IMPORTED_ACCOUNT_NUM: i64 = -1;
/// `derivedAccountNum` of a watch-only account.
pub const WATCH_ONLY_ACCOUNT_NUM: i64 = -2;

pub const MAINNET_CHAIN_ID: &str = "0x1";
pub const SEPOLIA_CHAIN_ID: &str = "0xaa36a7";

// ── Vault ──

/// The encrypted seed phrase. All fields are hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub ciphertext: String,
    pub salt: String,
    pub iv: String,
}

impl VaultRecord {
    pub fn new(ciphertext: &[u8], salt: &[u8], iv: &[u8]) -> Self {
        Self {
            ciphertext: hex::encode(ciphertext),
            salt: hex::encode(salt),
            iv: hex::encode(iv),
        }
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        decode_field("ciphertext", &self.ciphertext)
    }

    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        decode_field("salt", &self.salt)
    }

    pub fn iv_bytes(&self) -> Result<Vec<u8>> {
        decode_field("iv", &self.iv)
    }
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| WalletError::Storage(format!("vault {field} is not hex: {e}")))
}

// ── Accounts ──

/// Where an account's key comes from, decoded from `derivedAccountNum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Derived(u32),
    Imported,
    WatchOnly,
}

/// A live account. Exists only in an unlocked session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub public_key: String,
    pub private_key: Option<SecretString>,
    pub derived_account_num: i64,
}

impl Account {
    pub fn kind(&self) -> AccountKind {
        match self.derived_account_num {
            n if n >= 0 => AccountKind::Derived(n as u32),
            WATCH_ONLY_ACCOUNT_NUM => AccountKind::WatchOnly,
            _ => AccountKind::Imported,
        }
    }

    pub fn can_sign(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn is_address(&self, address: &str) -> bool {
        self.public_key.eq_ignore_ascii_case(address.trim())
    }

    pub fn to_public(&self) -> PublicAccount {
        PublicAccount {
            name: self.name.clone(),
            public_key: self.public_key.clone(),
            derived_account_num: self.derived_account_num,
        }
    }

    pub fn to_blob(&self) -> AccountBlob {
        AccountBlob {
            private_key: self.private_key.as_ref().map(|k| k.expose().to_string()),
            public_key: self.public_key.clone(),
            derived_account_num: self.derived_account_num,
        }
    }

    pub fn from_blob(name: String, blob: &AccountBlob) -> Self {
        Self {
            name,
            public_key: blob.public_key.clone(),
            private_key: blob.private_key.as_deref().map(SecretString::new),
            derived_account_num: blob.derived_account_num,
        }
    }
}

/// Plaintext of an account's encrypted blob.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct AccountBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    pub public_key: String,
    pub derived_account_num: i64,
}

/// Stored form of an account: cleartext name plus encrypted blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAccount {
    pub name: String,
    pub account: String,
}

/// Account fields that are safe to hand to a page or popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAccount {
    pub name: String,
    pub public_key: String,
    pub derived_account_num: i64,
}

// ── Saved addresses ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAddress {
    pub name: String,
    pub public_key: String,
}

/// Stored form: cleartext name, encrypted public key blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSavedAddress {
    pub name: String,
    pub public_key: String,
}

// ── Networks ──

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Network {
    #[default]
    EthereumMainnet,
    SepoliaTestnet,
    SolanaMainnet,
    SolanaTestnet,
    /// A chain added through `wallet_addEthereumChain`, by hex chain id.
    Custom(String),
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EthereumMainnet => "Ethereum_Mainnet",
            Self::SepoliaTestnet => "Sepolia_Testnet",
            Self::SolanaMainnet => "Solana_Mainnet",
            Self::SolanaTestnet => "Solana_Testnet",
            Self::Custom(id) => id,
        }
    }

    /// Hex chain id reported to pages. Non-EVM networks report mainnet.
    pub fn chain_id(&self) -> String {
        match self {
            Self::SepoliaTestnet => SEPOLIA_CHAIN_ID.to_string(),
            Self::Custom(id) => id.clone(),
            _ => MAINNET_CHAIN_ID.to_string(),
        }
    }

    pub fn chain_id_u64(&self) -> u64 {
        parse_chain_id(&self.chain_id()).unwrap_or(1)
    }

    pub fn is_evm(&self) -> bool {
        !matches!(self, Self::SolanaMainnet | Self::SolanaTestnet)
    }

    /// Maps a requested chain id to a network the wallet knows about.
    pub fn from_chain_id(chain_id: &str, custom: &[CustomChain]) -> Result<Self> {
        let wanted = parse_chain_id(chain_id)
            .ok_or_else(|| WalletError::InvalidParams(format!("bad chain id: {chain_id}")))?;
        if wanted == 1 {
            return Ok(Self::EthereumMainnet);
        }
        if wanted == 11_155_111 {
            return Ok(Self::SepoliaTestnet);
        }
        custom
            .iter()
            .find(|c| parse_chain_id(&c.chain_id) == Some(wanted))
            .map(|c| Self::Custom(c.chain_id.clone()))
            .ok_or_else(|| WalletError::UnknownChain(chain_id.to_string()))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Network {
    type Error = WalletError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            "Ethereum_Mainnet" => Ok(Self::EthereumMainnet),
            "Sepolia_Testnet" => Ok(Self::SepoliaTestnet),
            "Solana_Mainnet" => Ok(Self::SolanaMainnet),
            "Solana_Testnet" => Ok(Self::SolanaTestnet),
            id if parse_chain_id(id).is_some() => Ok(Self::Custom(id.to_string())),
            other => Err(WalletError::UnknownChain(other.to_string())),
        }
    }
}

impl From<Network> for String {
    fn from(network: Network) -> Self {
        network.as_str().to_string()
    }
}

impl std::str::FromStr for Network {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s.to_string())
    }
}

/// Parses a `0x`-prefixed hex chain id.
pub fn parse_chain_id(chain_id: &str) -> Option<u64> {
    let digits = chain_id.trim().strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Parameters of `wallet_addEthereumChain`, kept once approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomChain {
    pub chain_id: String,
    #[serde(default)]
    pub chain_name: String,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_currency: Option<NativeCurrency>,
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
}

// ── Approvals ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalKind {
    Transaction,
    Sign,
    SignTypedData,
    AddChain,
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transaction => "Transaction",
            Self::Sign | Self::SignTypedData => "Signing",
            Self::AddChain => "Chain addition",
        })
    }
}

/// Pending approval written for the approval window to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApprovalRequest {
    pub approval_id: Uuid,
    /// Relay id of the page request that triggered the approval.
    pub request_id: u64,
    pub kind: ApprovalKind,
    pub payload: Value,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestResponse {
    pub approved: bool,
}

// ── UI handoff ──

/// One-way copy of the public session state. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub accounts: Vec<PublicAccount>,
    pub selected: Option<PublicAccount>,
    pub saved: Vec<SavedAddress>,
    pub network: Network,
    pub chain_id: String,
}
