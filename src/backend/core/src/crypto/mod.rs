//! Hash and random primitives.
//!
//! Thin wrappers over the OS-seeded CSPRNG, SHA-256 and HMAC-SHA256, plus the
//! constant-time comparison used wherever secret material is compared.
//! Nothing in here holds state.

pub mod cipher;

pub use cipher::Cipher;

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Size in bytes of anti-forgery and session tokens.
pub const TOKEN_BYTES: usize = 32;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("malformed ciphertext envelope")]
    MalformedEnvelope,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Randomness
// ═══════════════════════════════════════════════════════════════════════════════

/// Fill a fresh buffer with `len` cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// `len` random bytes, lowercase hex encoded (`2 * len` chars).
pub fn random_hex(len: usize) -> String {
    hex::encode(random_bytes(len))
}

/// A 64-char lowercase hex token backed by 32 random bytes.
pub fn random_token() -> String {
    random_hex(TOKEN_BYTES)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Hashing
// ═══════════════════════════════════════════════════════════════════════════════

/// SHA-256 digest, lowercase hex.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// HMAC-SHA256 tag over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// HMAC-SHA256 tag over `data`, lowercase hex.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Verify a hex HMAC-SHA256 tag. The comparison is constant time.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], tag_hex: &str) -> bool {
    let Ok(tag) = hex::decode(tag_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(&tag).is_ok()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Comparison
// ═══════════════════════════════════════════════════════════════════════════════

/// Compare two byte strings without an early exit.
///
/// Every byte position up to the longer length is visited and XOR-accumulated,
/// and the length difference is folded into the result, so the running time
/// depends only on the input lengths and never on where the first mismatch is.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut acc: u8 = 0;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        acc |= x ^ y;
    }
    let len_diff = (a.len() ^ b.len()) as u64;
    std::hint::black_box(acc as u64 | len_diff) == 0
}

/// Log-safe preview of a secret: the first `visible` chars followed by `...`.
pub fn mask_secret(secret: &str, visible: usize) -> String {
    if secret.chars().count() <= visible {
        return "*".repeat(secret.chars().count());
    }
    let prefix: String = secret.chars().take(visible).collect();
    format!("{}...", prefix)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_shape() {
        let token = random_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_random_tokens_differ() {
        assert_ne!(random_token(), random_token());
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let tag = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            tag,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_hmac() {
        let tag = hmac_sha256_hex(b"key", b"payload");
        assert!(verify_hmac_sha256(b"key", b"payload", &tag));
        assert!(!verify_hmac_sha256(b"key", b"payload2", &tag));
        assert!(!verify_hmac_sha256(b"other", b"payload", &tag));
        assert!(!verify_hmac_sha256(b"key", b"payload", "not-hex"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcdeg"));
        assert!(!constant_time_eq(b"abcdef", b"xbcdef"));
        assert!(!constant_time_eq(b"abc", b"abcdef"));
        assert!(!constant_time_eq(b"abc\0\0\0", b"abc"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("0123456789abcdef", 8), "01234567...");
        assert_eq!(mask_secret("abc", 8), "***");
    }
}
