//! Password-sealed snapshot files.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "CBX1" | memory_kib u32 | iterations u32 | parallelism u32 | salt [16] | nonce [12] | ciphertext+tag
//! ```
//!
//! The key is derived with Argon2id from the password and salt using the
//! parameters in the header, then used for AES-256-GCM. A wrong password or
//! any tampering fails authentication instead of yielding garbage.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::config::CryptoConfig;

pub const MAGIC: &[u8; 4] = b"CBX1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + 12 + SALT_LEN + NONCE_LEN;

/// Upper bounds accepted from a file header, so a hostile file cannot make
/// key derivation allocate without limit.
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 64;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("not an encrypted snapshot (bad magic)")]
    InvalidMagic,

    #[error("encrypted snapshot is truncated")]
    Truncated,

    #[error("unsupported key derivation parameters: {0}")]
    UnsupportedParams(String),

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: wrong password or corrupted data")]
    Decryption,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl From<&CryptoConfig> for KdfParams {
    fn from(config: &CryptoConfig) -> Self {
        Self {
            memory_kib: config.memory_kib,
            iterations: config.iterations,
            parallelism: config.parallelism,
        }
    }
}

impl KdfParams {
    fn validate(&self) -> Result<(), CryptoError> {
        if self.memory_kib > MAX_MEMORY_KIB
            || self.iterations > MAX_ITERATIONS
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(CryptoError::UnsupportedParams(format!(
                "memory_kib={} iterations={} parallelism={}",
                self.memory_kib, self.iterations, self.parallelism
            )));
        }
        Ok(())
    }

    fn derive_key(&self, password: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        self.validate()?;
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(KEY_LEN))
            .map_err(|e| CryptoError::UnsupportedParams(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password, salt, &mut *key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

/// Whether `data` starts with the sealed-snapshot magic.
pub fn is_sealed(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Encrypt `plaintext` under a key derived from `password`.
pub fn seal(password: &str, plaintext: &[u8], params: &KdfParams) -> Result<Vec<u8>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = params.derive_key(password.as_bytes(), &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&*key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption("AES-GCM encryption failed".into()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&params.memory_kib.to_le_bytes());
    out.extend_from_slice(&params.iterations.to_le_bytes());
    out.extend_from_slice(&params.parallelism.to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed snapshot.
pub fn open(password: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    if data.len() < MAGIC.len() {
        return Err(CryptoError::Truncated);
    }
    if !is_sealed(data) {
        return Err(CryptoError::InvalidMagic);
    }
    if data.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Truncated);
    }

    let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    let params = KdfParams {
        memory_kib: word(4),
        iterations: word(8),
        parallelism: word(12),
    };
    let salt = &data[16..16 + SALT_LEN];
    let nonce = &data[16 + SALT_LEN..HEADER_LEN];
    let ciphertext = &data[HEADER_LEN..];

    let key = params.derive_key(password.as_bytes(), salt)?;
    let cipher = Aes256Gcm::new_from_slice(&*key).map_err(|_| CryptoError::Decryption)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}
