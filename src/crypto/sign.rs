/// Ethereum signing for the selected account.
///
/// Covers EIP-191 personal messages, EIP-712 typed data (v4), and EIP-1559
/// transactions. Signatures are returned as `0x`-prefixed 65-byte hex.
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_dyn_abi::TypedData;
use alloy_eips::eip2718::Encodable2718;
use alloy_eips::eip2930::AccessList;
use alloy_network::TxSignerSync;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde_json::Value;

use crate::error::{Result, WalletError};

/// Fields of an EIP-1559 transfer after defaults have been applied.
#[derive(Debug, Clone)]
pub struct Eip1559Request {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub hash: B256,
    /// EIP-2718 envelope, ready for `eth_sendRawTransaction`.
    pub raw: Vec<u8>,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// Signs `message` with the EIP-191 prefix.
///
/// A `0x`-prefixed hex message is signed as raw bytes, anything else as its
/// UTF-8 text.
pub fn personal_sign(signer: &PrivateKeySigner, message: &str) -> Result<String> {
    let bytes = message_bytes(message);
    let sig = signer
        .sign_message_sync(&bytes)
        .map_err(|e| WalletError::Signing(e.to_string()))?;
    Ok(format!("0x{}", hex::encode(sig.as_bytes())))
}

/// Parses a typed-data payload given either as a JSON object or a JSON string.
pub fn parse_typed_data(payload: &Value) -> Result<TypedData> {
    let parsed = match payload {
        Value::String(s) => serde_json::from_str::<TypedData>(s),
        other => serde_json::from_value::<TypedData>(other.clone()),
    };
    parsed.map_err(|e| WalletError::InvalidParams(format!("invalid typed data: {e}")))
}

pub fn typed_data_hash(payload: &Value) -> Result<B256> {
    parse_typed_data(payload)?
        .eip712_signing_hash()
        .map_err(|e| WalletError::InvalidParams(format!("typed data cannot be hashed: {e}")))
}

pub fn sign_typed_data_v4(signer: &PrivateKeySigner, payload: &Value) -> Result<String> {
    let hash = typed_data_hash(payload)?;
    let sig = signer
        .sign_hash_sync(&hash)
        .map_err(|e| WalletError::Signing(e.to_string()))?;
    Ok(format!("0x{}", hex::encode(sig.as_bytes())))
}

pub fn sign_eip1559(signer: &PrivateKeySigner, req: Eip1559Request) -> Result<SignedTransaction> {
    if req.max_priority_fee_per_gas > req.max_fee_per_gas {
        return Err(WalletError::InvalidParams(
            "priority fee exceeds max fee".into(),
        ));
    }

    let mut tx = TxEip1559 {
        chain_id: req.chain_id,
        nonce: req.nonce,
        gas_limit: req.gas_limit,
        max_fee_per_gas: req.max_fee_per_gas,
        max_priority_fee_per_gas: req.max_priority_fee_per_gas,
        to: req.to.map(TxKind::Call).unwrap_or(TxKind::Create),
        value: req.value,
        access_list: AccessList::default(),
        input: req.input,
    };

    let signature = signer
        .sign_transaction_sync(&mut tx)
        .map_err(|e| WalletError::Signing(e.to_string()))?;
    let signed = tx.into_signed(signature);
    let hash = *signed.hash();
    let envelope = TxEnvelope::from(signed);

    Ok(SignedTransaction {
        hash,
        raw: envelope.encoded_2718(),
    })
}

fn message_bytes(message: &str) -> Vec<u8> {
    if let Some(stripped) = message.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(stripped) {
            return bytes;
        }
    }
    message.as_bytes().to_vec()
}
