//! Anonymous-sender sealed boxes for GitHub Actions secrets.
//!
//! The ciphertext embeds an ephemeral public key, so only the holder of the
//! recipient's private key (the Actions runtime) can open it and the sender
//! stays unauthenticated.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, KEY_SIZE};

use crate::errors::SealError;

/// Seals `plaintext` to the raw 32-byte X25519 `public_key`.
pub fn seal(public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let key: [u8; KEY_SIZE] = public_key
        .try_into()
        .map_err(|_| SealError::KeyLength(public_key.len()))?;

    PublicKey::from(key)
        .seal(&mut OsRng, plaintext)
        .map_err(|_| SealError::Encryption)
}

/// Seals `plaintext` to a base64-encoded public key (as served by GitHub) and
/// returns the base64-encoded ciphertext.
pub fn seal_base64(public_key_b64: &str, plaintext: &str) -> Result<String, SealError> {
    let key = STANDARD.decode(public_key_b64.trim())?;
    let sealed = seal(&key, plaintext.as_bytes())?;
    Ok(STANDARD.encode(sealed))
}
