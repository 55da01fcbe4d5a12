//! Secret sealing for pooled provider credentials.
//!
//! Secrets are stored AES-256-GCM sealed with additional authenticated data
//! binding the ciphertext to its row (`"{id}|{provider}"`), so a sealed value
//! copied onto another row fails to open. Rows written before sealing existed
//! hold the raw secret with no version byte and are returned as-is.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const VERSION_SEALED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_SEALED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("secret is not valid UTF-8")]
    InvalidUtf8,
}

/// 32-byte AES key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

/// Encrypt bytes using AES-256-GCM.
///
/// Output layout: version byte, 12-byte nonce, ciphertext with appended tag.
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    sealed.push(VERSION_SEALED);
    sealed.extend_from_slice(&nonce);
    sealed.append(&mut ciphertext);

    Ok(sealed)
}

/// Decrypt bytes produced by [`encrypt_bytes`].
///
/// Payloads without the version marker are treated as legacy plaintext.
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let Some(&version) = ciphertext.first() else {
        return Err(CryptoError::EmptyCiphertext);
    };

    if version != VERSION_SEALED {
        return Ok(ciphertext.to_vec());
    }

    if ciphertext.len() < MIN_SEALED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let (nonce, body) = ciphertext[VERSION_FIELD_LEN..].split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Whether a stored value is in the sealed format.
pub fn is_sealed(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_SEALED_LEN && ciphertext[0] == VERSION_SEALED
}

fn secret_aad(id: Uuid, provider: &str) -> String {
    format!("{}|{}", id, provider)
}

/// Seal a plaintext secret for storage on the row identified by `id`/`provider`.
pub fn seal_secret(
    key: &CryptoKey,
    id: Uuid,
    provider: &str,
    secret: &str,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, secret_aad(id, provider).as_bytes(), secret.as_bytes())
}

/// Open a stored secret, accepting legacy plaintext rows.
pub fn open_secret(
    key: &CryptoKey,
    id: Uuid,
    provider: &str,
    stored: &[u8],
) -> Result<Zeroizing<String>, CryptoError> {
    let bytes = decrypt_bytes(key, secret_aad(id, provider).as_bytes(), stored)?;
    String::from_utf8(bytes)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::InvalidUtf8)
}

/// Lowercase hex SHA-256 of a plaintext secret.
pub fn fingerprint(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Display form of a secret: first four and last four characters.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count < 8 {
        return "***".to_string();
    }
    let head: String = secret.chars().take(4).collect();
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    #[test]
    fn seal_and_open_secret() {
        let key = test_key();
        let id = Uuid::new_v4();

        let sealed = seal_secret(&key, id, "gemini", "AIzaSy-example-secret").unwrap();
        assert!(is_sealed(&sealed));
        assert!(
            !sealed
                .windows(b"AIzaSy".len())
                .any(|window| window == b"AIzaSy")
        );

        let opened = open_secret(&key, id, "gemini", &sealed).unwrap();
        assert_eq!(opened.as_str(), "AIzaSy-example-secret");
    }

    #[test]
    fn sealed_secret_is_bound_to_its_row() {
        let key = test_key();
        let id = Uuid::new_v4();
        let sealed = seal_secret(&key, id, "gemini", "secret-value").unwrap();

        assert!(open_secret(&key, Uuid::new_v4(), "gemini", &sealed).is_err());
        assert!(open_secret(&key, id, "openai", &sealed).is_err());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let id = Uuid::new_v4();
        let sealed = seal_secret(&test_key(), id, "gemini", "secret-value").unwrap();
        let other = CryptoKey::new(vec![9u8; 32]).unwrap();

        assert!(matches!(
            open_secret(&other, id, "gemini", &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let mut sealed = encrypt_bytes(&key, b"aad", b"secret message").unwrap();
        sealed[13] ^= 0x01;

        assert!(decrypt_bytes(&key, b"aad", &sealed).is_err());
    }

    #[test]
    fn nonces_differ_between_seals() {
        let key = test_key();
        let first = encrypt_bytes(&key, b"aad", b"same").unwrap();
        let second = encrypt_bytes(&key, b"aad", b"same").unwrap();

        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn legacy_plaintext_rows_open_unchanged() {
        let key = test_key();
        let opened = open_secret(&key, Uuid::new_v4(), "gemini", b"legacy-key-value").unwrap();

        assert_eq!(opened.as_str(), "legacy-key-value");
        assert!(!is_sealed(b"legacy-key-value"));
    }

    #[test]
    fn truncated_sealed_payload_is_invalid() {
        let key = test_key();
        let result = decrypt_bytes(&key, b"aad", &[VERSION_SEALED, 0x02]);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));

        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[]),
            Err(CryptoError::EmptyCiphertext)
        ));
    }

    #[test]
    fn key_length_enforced() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn debug_output_hides_key_material() {
        let key = CryptoKey::new(vec![0xAB; 32]).unwrap();
        assert_eq!(format!("{:?}", key), "CryptoKey([REDACTED])");
    }

    #[test]
    fn fingerprint_is_stable_hex_sha256() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }

    #[test]
    fn mask_secret_shows_edges_only() {
        assert_eq!(mask_secret("sk-1234567890abcd"), "sk-1...abcd");
        assert_eq!(mask_secret("12345678"), "1234...5678");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret(""), "***");
    }
}
