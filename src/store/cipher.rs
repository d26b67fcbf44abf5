//! AES-256-GCM sealing for values written to disk.
//!
//! Sealed form: `base64(nonce || ciphertext)` with a random 12-byte nonce per
//! value.

use aes_gcm::aead::Aead;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use crate::error::StoreError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// A 256-bit key for sealing stored values.
#[derive(Clone)]
pub struct SealingKey {
    key: [u8; KEY_LEN],
}

impl SealingKey {
    /// Decode a base64 key. Must decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, StoreError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| StoreError::Crypto(format!("Invalid base64 key: {e}")))?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::Crypto(format!(
                "Encryption key must be exactly {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Base64 form, suitable for `storage.encryption_key`.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key)
    }

    /// Encrypt a value.
    pub fn seal(&self, plaintext: &str) -> Result<String, StoreError> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::Crypto(format!("Encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<String, StoreError> {
        let data = STANDARD
            .decode(sealed.trim())
            .map_err(|e| StoreError::Crypto(format!("Sealed value is not base64: {e}")))?;
        if data.len() < NONCE_LEN {
            return Err(StoreError::Crypto(
                "Sealed value too short to contain nonce".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|e| StoreError::Crypto(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| StoreError::Crypto(format!("Decrypted value is not UTF-8: {e}")))
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(<redacted>)")
    }
}
