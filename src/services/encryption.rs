use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;
use serde::{de::DeserializeOwned, Serialize};

const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing for platform session payloads at rest.
///
/// New ciphertext is always produced with the current key. Decryption tries
/// the current key first and then any keys retired by a rotation.
pub struct EncryptionService {
    current: Aes256Gcm,
    previous: Vec<Aes256Gcm>,
}

fn cipher_from_base64(key_base64: &str) -> Result<Aes256Gcm, EncryptionError> {
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key_base64.trim())
        .map_err(|_| EncryptionError::InvalidKey)?;

    if key_bytes.len() != 32 {
        return Err(EncryptionError::InvalidKey);
    }

    Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)
}

impl EncryptionService {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        Self::with_previous_keys::<&str>(key_base64, &[])
    }

    /// Create from the current key plus keys that may still appear in stored rows.
    pub fn with_previous_keys<S: AsRef<str>>(
        key_base64: &str,
        previous: &[S],
    ) -> Result<Self, EncryptionError> {
        Ok(Self {
            current: cipher_from_base64(key_base64)?,
            previous: previous
                .iter()
                .map(|k| cipher_from_base64(k.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    /// A fresh random key in the base64 form `new` accepts.
    pub fn generate_key() -> String {
        base64::engine::general_purpose::STANDARD.encode(Aes256Gcm::generate_key(&mut OsRng))
    }

    /// Encrypt data, returning nonce (12 bytes) prepended to ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .current
            .encrypt(&nonce, plaintext)
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);
        Ok(output)
    }

    /// Decrypt data where the first 12 bytes are the nonce.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        std::iter::once(&self.current)
            .chain(self.previous.iter())
            .find_map(|cipher| cipher.decrypt(nonce, ciphertext).ok())
            .ok_or(EncryptionError::DecryptFailed)
    }

    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncryptionError> {
        let plaintext = serde_json::to_vec(value).map_err(EncryptionError::Payload)?;
        self.encrypt(&plaintext)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, EncryptionError> {
        let plaintext = self.decrypt(data)?;
        serde_json::from_slice(&plaintext).map_err(EncryptionError::Payload)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,

    #[error("Decrypted payload is not valid JSON: {0}")]
    Payload(serde_json::Error),
}
