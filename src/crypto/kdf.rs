/// PBKDF2 key derivation for password-based vault encryption.
///
/// Parameters: HMAC-SHA256, 100,000 iterations, 256-bit output.
/// The key is never persisted; it is re-derived from the password and the
/// vault salt on every unlock, so derivation must stay deterministic.
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::crypto::sensitive::SensitiveBytes32;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Generate a random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 32-byte key from a password using PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &[u8]) -> SensitiveBytes32 {
    derive_key_with_rounds(password, salt, PBKDF2_ITERATIONS)
}

fn derive_key_with_rounds(password: &str, salt: &[u8], rounds: u32) -> SensitiveBytes32 {
    let mut output = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut output);
    SensitiveBytes32::new(output)
}
