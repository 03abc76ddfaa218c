//! AES-256-GCM symmetric encryption.
//!
//! Ciphertexts travel as a single base64 string: `nonce (12 bytes) || ciphertext+tag`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::Sha256;

use super::CryptoError;

/// AES-256 key size.
pub const KEY_LEN: usize = 32;

/// GCM nonce size.
pub const NONCE_LEN: usize = 12;

/// PBKDF2 iteration count for passphrase-derived keys.
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Authenticated symmetric cipher.
#[derive(Clone)]
pub struct Cipher {
    inner: Aes256Gcm,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Build from a raw 32-byte key.
    pub fn from_key(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            inner: Aes256Gcm::new(key),
        })
    }

    /// Derive a key from a passphrase with PBKDF2-HMAC-SHA256.
    pub fn derive(passphrase: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
        Self {
            inner: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Encrypt and encode. A fresh random nonce is used for every call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }

    /// Decode and decrypt an envelope produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let envelope = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::MalformedEnvelope)?;
        if envelope.len() <= NONCE_LEN {
            return Err(CryptoError::MalformedEnvelope);
        }
        let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
        self.inner
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Convenience wrapper for UTF-8 payloads.
    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt(encoded)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_bytes;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = Cipher::from_key(&random_bytes(KEY_LEN)).unwrap();
        let sealed = cipher.encrypt(b"figma personal access token").unwrap();
        assert_eq!(cipher.decrypt_string(&sealed).unwrap(), "figma personal access token");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let cipher = Cipher::from_key(&[7u8; KEY_LEN]).unwrap();
        assert_ne!(cipher.encrypt(b"same").unwrap(), cipher.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = Cipher::from_key(&[1u8; KEY_LEN]).unwrap();
        let b = Cipher::from_key(&[2u8; KEY_LEN]).unwrap();
        let sealed = a.encrypt(b"secret").unwrap();
        assert!(matches!(b.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let cipher = Cipher::from_key(&[3u8; KEY_LEN]).unwrap();
        let sealed = cipher.encrypt(b"secret").unwrap();
        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(raw);
        assert!(matches!(cipher.decrypt(&tampered), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_malformed_envelope() {
        let cipher = Cipher::from_key(&[3u8; KEY_LEN]).unwrap();
        assert!(matches!(cipher.decrypt("%%%"), Err(CryptoError::MalformedEnvelope)));
        assert!(matches!(cipher.decrypt("AAAA"), Err(CryptoError::MalformedEnvelope)));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            Cipher::from_key(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn test_derived_keys_agree() {
        let a = Cipher::derive("correct horse", b"salt-1");
        let b = Cipher::derive("correct horse", b"salt-1");
        let sealed = a.encrypt(b"payload").unwrap();
        assert_eq!(b.decrypt(&sealed).unwrap(), b"payload");

        let c = Cipher::derive("correct horse", b"salt-2");
        assert!(c.decrypt(&sealed).is_err());
    }
}
