//
// cipher.rs
// Dicom-Deid-rs
//
// Symmetric cipher boundary used by the identity escrow, with an AES-256-GCM implementation backed by a
// hex-encoded key file.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("ciphertext too short ({0} bytes)")]
    TooShort(usize),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the escrow needs from a cipher; key lifecycle stays with the implementor.
pub trait IdentityCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// AES-256-GCM; output is `nonce || ciphertext`.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesGcmCipher { .. }")
    }
}

impl AesGcmCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn generate_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| CipherError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self::new(&key))
    }

    /// Loads a key persisted by [`AesGcmCipher::write_key_file`].
    pub fn load(path: &Path) -> Result<Self, CipherError> {
        let encoded = fs::read_to_string(path).map_err(|source| CipherError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_hex(&encoded)
    }

    pub fn write_key_file(path: &Path, key: &[u8; KEY_LEN]) -> Result<(), CipherError> {
        fs::write(path, hex::encode(key)).map_err(|source| CipherError::KeyFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl IdentityCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < NONCE_LEN {
            return Err(CipherError::TooShort(data.len()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CipherError::Decrypt(e.to_string()))
    }
}
