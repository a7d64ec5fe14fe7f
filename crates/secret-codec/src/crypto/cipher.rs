//! AES-CBC encryption and decryption of raw byte strings.
//!
//! **Algorithm choice:** CBC with PKCS#7 padding is what existing `v2` key
//! files and stored envelopes were produced with, so it is kept for
//! compatibility. It is unauthenticated; a wrong key usually surfaces as a
//! padding failure but is not guaranteed to.
//!
//! When a key carries no IV the all-zero IV is used, matching OpenSSL's
//! behaviour when no IV is set. Fixed key + fixed (or absent) IV is therefore
//! deterministic.

use std::fmt;
use std::str::FromStr;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

/// Byte length of an AES block, and so of every CBC IV.
pub const IV_LEN: usize = 16;

const ZERO_IV: [u8; IV_LEN] = [0u8; IV_LEN];

/// Supported symmetric algorithms, named as OpenSSL names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    /// `aes-128-cbc`
    Aes128Cbc,
    /// `aes-192-cbc`
    Aes192Cbc,
    /// `aes-256-cbc`
    #[default]
    Aes256Cbc,
}

impl Algorithm {
    /// Required key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Algorithm::Aes128Cbc => 16,
            Algorithm::Aes192Cbc => 24,
            Algorithm::Aes256Cbc => 32,
        }
    }

    /// Required IV length in bytes.
    pub fn iv_len(self) -> usize {
        IV_LEN
    }

    /// OpenSSL-style name, e.g. `"aes-256-cbc"`.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Aes128Cbc => "aes-128-cbc",
            Algorithm::Aes192Cbc => "aes-192-cbc",
            Algorithm::Aes256Cbc => "aes-256-cbc",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-128-cbc" => Ok(Algorithm::Aes128Cbc),
            "aes-192-cbc" => Ok(Algorithm::Aes192Cbc),
            "aes-256-cbc" => Ok(Algorithm::Aes256Cbc),
            _ => Err(CipherError::UnsupportedAlgorithm(s.to_owned())),
        }
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length for the algorithm.
    #[error("invalid key length for {algorithm}: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Algorithm the key was meant for.
        algorithm: Algorithm,
        /// Length the algorithm requires.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },

    /// The IV is not [`IV_LEN`] bytes.
    #[error("invalid IV length: expected {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),

    /// The algorithm name is not one we implement.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Decryption produced invalid padding (wrong key or corrupted data).
    #[error("cbc unpad failed")]
    Padding,
}

/// Check `key` and `iv` lengths against `alg`.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] or [`CipherError::InvalidIvLength`].
pub fn validate(alg: Algorithm, key: &[u8], iv: Option<&[u8]>) -> Result<(), CipherError> {
    if key.len() != alg.key_len() {
        return Err(CipherError::InvalidKeyLength {
            algorithm: alg,
            expected: alg.key_len(),
            actual: key.len(),
        });
    }
    if let Some(iv) = iv {
        if iv.len() != alg.iv_len() {
            return Err(CipherError::InvalidIvLength(iv.len()));
        }
    }
    Ok(())
}

/// Encrypt `plaintext` with PKCS#7 padding. Empty input yields one block.
///
/// # Errors
///
/// Returns a length error if `key` or `iv` do not fit `alg`.
pub fn encrypt(
    alg: Algorithm,
    key: &[u8],
    iv: Option<&[u8]>,
    plaintext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    validate(alg, key, iv)?;
    let iv = iv.unwrap_or(&ZERO_IV[..]);
    let ciphertext = match alg {
        Algorithm::Aes128Cbc => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(|_| key_len_error(alg, key))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        Algorithm::Aes192Cbc => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(|_| key_len_error(alg, key))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        Algorithm::Aes256Cbc => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(|_| key_len_error(alg, key))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };
    Ok(ciphertext)
}

/// Decrypt `ciphertext` and strip PKCS#7 padding.
///
/// # Errors
///
/// Returns a length error if `key` or `iv` do not fit `alg`, and
/// [`CipherError::Padding`] if the ciphertext does not unpad cleanly.
pub fn decrypt(
    alg: Algorithm,
    key: &[u8],
    iv: Option<&[u8]>,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    validate(alg, key, iv)?;
    let iv = iv.unwrap_or(&ZERO_IV[..]);
    let plaintext = match alg {
        Algorithm::Aes128Cbc => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(|_| key_len_error(alg, key))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        Algorithm::Aes192Cbc => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(|_| key_len_error(alg, key))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        Algorithm::Aes256Cbc => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(|_| key_len_error(alg, key))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    };
    plaintext.map_err(|_| CipherError::Padding)
}

fn key_len_error(alg: Algorithm, key: &[u8]) -> CipherError {
    CipherError::InvalidKeyLength {
        algorithm: alg,
        expected: alg.key_len(),
        actual: key.len(),
    }
}
