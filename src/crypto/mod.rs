/// Cryptographic primitives for the wallet core.
///
/// - `kdf`: PBKDF2-HMAC-SHA256 password → 256-bit key
/// - `cipher`: AES-256-CBC (PKCS#7) for the vault and per-account blobs
/// - `sensitive`: zeroize-on-drop wrappers for key material and phrases
/// - `keys`: BIP-39 mnemonics and BIP-44 Ethereum key derivation
/// - `sign`: EIP-191, EIP-712 and EIP-1559 signing
pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod sensitive;
pub mod sign;
