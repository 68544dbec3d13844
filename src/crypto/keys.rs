/// Seed phrases and Ethereum key pairs.
///
/// Seed accounts live at `m/44'/60'/0'/0/{n}`; imported accounts come from a
/// raw secp256k1 private key.
use alloy_primitives::Address;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::sensitive::SecretString;
use crate::error::{Result, WalletError};

/// 128 bits of entropy gives a 12-word phrase.
const ENTROPY_LEN: usize = 16;

/// A derived or imported key pair in the form the vault persists.
#[derive(Debug, Clone)]
pub struct Keypair {
    /// EIP-55 checksummed address.
    pub address: String,
    /// `0x`-prefixed hex private key.
    pub private_key: SecretString,
}

pub fn generate_mnemonic() -> Result<SecretString> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
    OsRng.fill_bytes(&mut entropy[..]);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..])
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(SecretString::new(mnemonic.to_string()))
}

/// Checks the phrase against the English BIP-39 word list and checksum.
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    Mnemonic::parse_in_normalized(Language::English, phrase.trim())
        .map(|_| ())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

pub fn signer_from_mnemonic(phrase: &str, index: u32) -> Result<PrivateKeySigner> {
    MnemonicBuilder::<English>::default()
        .phrase(phrase.trim())
        .index(index)
        .map_err(|_| WalletError::KeypairDerivationFailed)?
        .build()
        .map_err(|_| WalletError::KeypairDerivationFailed)
}

pub fn derive_keypair(phrase: &str, index: u32) -> Result<Keypair> {
    let signer = signer_from_mnemonic(phrase, index)?;
    Ok(keypair_of(&signer))
}

pub fn signer_from_private_key(private_key: &str) -> Result<PrivateKeySigner> {
    let raw = Zeroizing::new(
        hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|_| WalletError::InvalidParams("private key is not hex".into()))?,
    );
    PrivateKeySigner::from_slice(&raw)
        .map_err(|_| WalletError::InvalidParams("not a valid secp256k1 private key".into()))
}

pub fn keypair_from_private_key(private_key: &str) -> Result<Keypair> {
    let signer = signer_from_private_key(private_key)?;
    Ok(keypair_of(&signer))
}

/// Normalizes and checksums a user-supplied address.
pub fn parse_address(address: &str) -> Result<Address> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|_| WalletError::InvalidParams(format!("invalid address: {address}")))
}

pub fn checksum_address(address: &str) -> Result<String> {
    Ok(parse_address(address)?.to_checksum(None))
}

fn keypair_of(signer: &PrivateKeySigner) -> Keypair {
    Keypair {
        address: signer.address().to_checksum(None),
        private_key: SecretString::new(format!("0x{}", hex::encode(signer.to_bytes()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_mnemonic_has_twelve_words() {
        let m = generate_mnemonic().unwrap();
        assert_eq!(m.expose().split_whitespace().count(), 12);
        validate_mnemonic(m.expose()).unwrap();
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validate_mnemonic("not a real phrase at all").is_err());
        assert!(validate_mnemonic(PHRASE).is_ok());
    }

    #[test]
    fn test_derive_first_account() {
        let kp = derive_keypair(PHRASE, 0).unwrap();
        assert_eq!(kp.address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
        assert!(kp.private_key.expose().starts_with("0x"));
        assert_eq!(kp.private_key.expose().len(), 66);
    }

    #[test]
    fn test_indices_yield_distinct_accounts() {
        let a = derive_keypair(PHRASE, 0).unwrap();
        let b = derive_keypair(PHRASE, 1).unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_import_roundtrips_derived_key() {
        let derived = derive_keypair(PHRASE, 2).unwrap();
        let imported = keypair_from_private_key(derived.private_key.expose()).unwrap();
        assert_eq!(derived.address, imported.address);
    }

    #[test]
    fn test_import_known_key_with_and_without_prefix() {
        let key = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let a = keypair_from_private_key(key).unwrap();
        let b = keypair_from_private_key(&format!("0x{key}")).unwrap();
        assert_eq!(a.address, "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn test_import_rejects_bad_key() {
        assert!(keypair_from_private_key("0x1234").is_err());
        assert!(keypair_from_private_key("not hex").is_err());
    }

    #[test]
    fn test_checksum_address() {
        let lower = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
        assert_eq!(
            checksum_address(lower).unwrap(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        assert!(checksum_address("0x12").is_err());
    }
}
