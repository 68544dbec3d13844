/// AES-256-CBC with PKCS#7 padding for the vault and per-record blobs.
///
/// CBC carries no authentication tag. A wrong key is detected by the
/// format checks layered on top: PKCS#7 padding, UTF-8, the mnemonic word
/// count, and JSON parsing of account and saved-address blobs. Any of those
/// failing is reported as `DecryptionFailed`, never as a plaintext.
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::crypto::sensitive::{SecretString, SensitiveBytes32};
use crate::error::{Result, WalletError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const IV_LEN: usize = 16;

/// Minimum number of words a decrypted mnemonic must contain.
pub const MIN_MNEMONIC_WORDS: usize = 12;

pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

pub fn encrypt(plaintext: &[u8], key: &SensitiveBytes32, iv: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn decrypt(ciphertext: &[u8], key: &SensitiveBytes32, iv: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| WalletError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| WalletError::DecryptionFailed("bad padding".into()))
}

pub fn encrypt_mnemonic(mnemonic: &str, key: &SensitiveBytes32, iv: &[u8]) -> Result<Vec<u8>> {
    encrypt(mnemonic.as_bytes(), key, iv)
}

/// Decrypts the vault ciphertext and checks it still looks like a phrase.
pub fn decrypt_mnemonic(
    ciphertext: &[u8],
    key: &SensitiveBytes32,
    iv: &[u8],
) -> Result<SecretString> {
    let plaintext = Zeroizing::new(decrypt(ciphertext, key, iv)?);
    let phrase = std::str::from_utf8(&plaintext)
        .map_err(|_| WalletError::DecryptionFailed("mnemonic is not utf-8".into()))?;
    if phrase.split_whitespace().count() < MIN_MNEMONIC_WORDS {
        return Err(WalletError::DecryptionFailed(
            "mnemonic failed word-count check".into(),
        ));
    }
    Ok(SecretString::new(phrase.trim()))
}

/// Encrypts a serializable record under a fresh IV.
///
/// Output is `hex(iv || ciphertext)` so the blob is self-contained.
pub fn seal_json<T: Serialize>(value: &T, key: &SensitiveBytes32) -> Result<String> {
    let json = Zeroizing::new(serde_json::to_vec(value)?);
    let iv = generate_iv();
    let ciphertext = encrypt(&json, key, &iv)?;

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(hex::encode(blob))
}

pub fn open_json<T: DeserializeOwned>(blob: &str, key: &SensitiveBytes32) -> Result<T> {
    let raw = hex::decode(blob)
        .map_err(|e| WalletError::DecryptionFailed(format!("blob is not hex: {e}")))?;
    if raw.len() <= IV_LEN {
        return Err(WalletError::DecryptionFailed("blob too short".into()));
    }
    let (iv, ciphertext) = raw.split_at(IV_LEN);
    let plaintext = Zeroizing::new(decrypt(ciphertext, key, iv)?);
    serde_json::from_slice(&plaintext)
        .map_err(|e| WalletError::DecryptionFailed(format!("blob is not valid json: {e}")))
}
