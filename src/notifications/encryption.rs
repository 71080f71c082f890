use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid key length")]
    InvalidKeyLength,
}

/// Symmetric encryption for stored notification channel configurations.
/// Uses AES-256-GCM.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Creates a new EncryptionService with a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?,
        })
    }

    /// Builds the service from a hex-encoded 32-byte key, as found in configuration.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, EncryptionError> {
        let key_bytes =
            hex::decode(key_hex.trim()).map_err(|e| EncryptionError::InvalidKey(e.to_string()))?;
        Self::new(&key_bytes)
    }

    /// Encrypts a plaintext byte slice.
    /// Prepends the 12-byte nonce to the ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // must be unique for each encryption
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypts data produced by [`EncryptionService::encrypt`].
    pub fn decrypt(&self, encrypted_data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if encrypted_data.len() < NONCE_SIZE {
            return Err(EncryptionError::DecryptionFailed(
                "Invalid encrypted data: too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encrypt_decrypt_success() {
        let service = EncryptionService::from_hex_key(KEY_HEX).unwrap();
        let plain = br#"{"type":"telegram","botToken":"x","chatId":"1"}"#;

        let encrypted = service.encrypt(plain).unwrap();
        assert_ne!(&encrypted[NONCE_SIZE..], plain.as_slice());
        assert_eq!(service.decrypt(&encrypted).unwrap(), plain.to_vec());
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let service1 = EncryptionService::from_hex_key(KEY_HEX).unwrap();
        let service2 = EncryptionService::from_hex_key(
            "f1e1d1c1b1a191817161514131211101f0e0d0c0b0a090807060504030201000",
        )
        .unwrap();

        let encrypted = service1.encrypt(b"another secret").unwrap();
        assert!(matches!(
            service2.decrypt(&encrypted),
            Err(EncryptionError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_rejects_bad_keys_and_short_data() {
        assert!(matches!(
            EncryptionService::from_hex_key("zz"),
            Err(EncryptionError::InvalidKey(_))
        ));
        assert!(matches!(
            EncryptionService::new(&[0u8; 16]),
            Err(EncryptionError::InvalidKeyLength)
        ));

        let service = EncryptionService::from_hex_key(KEY_HEX).unwrap();
        assert!(service.decrypt(&[1, 2, 3]).is_err());
    }
}
