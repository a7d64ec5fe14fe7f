//! [`Key`]: an immutable symmetric key, its on-disk record, and generation.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::cipher::{self, Algorithm, CipherError};

/// Length of the random password used when generating a key without one.
pub const GENERATED_PASSWORD_LEN: usize = 32;

/// Anything that can encrypt and decrypt raw bytes.
///
/// [`Key`] is the production implementation; tests substitute doubles.
#[cfg_attr(test, mockall::automock)]
pub trait SymmetricKey: Send + Sync {
    /// Encrypt `plaintext`, returning raw ciphertext bytes.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Decrypt raw ciphertext bytes.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Errors produced while building, loading or persisting keys.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Reading or writing the key file failed.
    #[error("key file I/O failed for {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The key file is not a valid key record.
    #[error("key file is not a valid key record: {0}")]
    Format(#[from] serde_yaml::Error),

    /// The key or IV field is not valid base64.
    #[error("key record field `{0}` is not valid base64")]
    Base64(&'static str),

    /// The record names an unknown algorithm or has wrong lengths.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Persisted form of a key: algorithm name plus base64 key and IV.
///
/// Older key files use symbol-style field names (`:algorithm`, `:key`, `:iv`);
/// both spellings are accepted on read, plain names are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// OpenSSL algorithm name, e.g. `"aes-256-cbc"`.
    #[serde(alias = ":algorithm")]
    pub algorithm: String,
    /// Base64-encoded key bytes.
    #[serde(alias = ":key")]
    pub key: String,
    /// Base64-encoded IV bytes, if any.
    #[serde(alias = ":iv", default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

/// Raw key or IV bytes, zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
struct Material(Vec<u8>);

impl Drop for Material {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// An immutable symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    algorithm: Algorithm,
    key: Material,
    iv: Option<Material>,
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Key")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .field("iv", &self.iv.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Key {
    /// Build a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError`] if `key` or `iv` do not fit `algorithm`.
    pub fn new(algorithm: Algorithm, key: &[u8], iv: Option<&[u8]>) -> Result<Self, CipherError> {
        cipher::validate(algorithm, key, iv)?;
        Ok(Self {
            algorithm,
            key: Material(key.to_vec()),
            iv: iv.map(|iv| Material(iv.to_vec())),
        })
    }

    /// Derive a fresh key: SHA-256 of `password || salt`, truncated to the
    /// algorithm's key length. A missing password is replaced with
    /// [`GENERATED_PASSWORD_LEN`] random bytes. The key carries no IV.
    pub fn generate(algorithm: Algorithm, password: Option<&[u8]>, salt: Option<&[u8]>) -> Self {
        let mut random = [0u8; GENERATED_PASSWORD_LEN];
        let password = match password {
            Some(p) => p,
            None => {
                OsRng.fill_bytes(&mut random);
                &random[..]
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(password);
        if let Some(salt) = salt {
            hasher.update(salt);
        }
        let digest = hasher.finalize();
        random.iter_mut().for_each(|b| *b = 0);

        // SHA-256 yields 32 bytes, enough for every supported algorithm.
        Self {
            algorithm,
            key: Material(digest[..algorithm.key_len()].to_vec()),
            iv: None,
        }
    }

    /// The key's algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Whether the key carries an explicit IV.
    pub fn has_iv(&self) -> bool {
        self.iv.is_some()
    }

    /// Decode a persisted [`KeyRecord`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Base64`] for undecodable fields and
    /// [`KeyError::Cipher`] for unknown algorithms or wrong lengths.
    pub fn from_record(record: &KeyRecord) -> Result<Self, KeyError> {
        let algorithm: Algorithm = record.algorithm.parse()?;
        let key = STANDARD
            .decode(record.key.trim())
            .map_err(|_| KeyError::Base64("key"))?;
        let iv = record
            .iv
            .as_deref()
            .map(|iv| STANDARD.decode(iv.trim()).map_err(|_| KeyError::Base64("iv")))
            .transpose()?;
        Ok(Self::new(algorithm, &key, iv.as_deref())?)
    }

    /// Encode as a [`KeyRecord`] for persistence.
    pub fn to_record(&self) -> KeyRecord {
        KeyRecord {
            algorithm: self.algorithm.to_string(),
            key: STANDARD.encode(&self.key.0),
            iv: self.iv.as_ref().map(|iv| STANDARD.encode(&iv.0)),
        }
    }

    /// Serialise as a YAML key record.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Format`] if serialisation fails.
    pub fn to_yaml(&self) -> Result<String, KeyError> {
        Ok(serde_yaml::to_string(&self.to_record())?)
    }

    /// Load a key from a YAML key file.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Io`] if the file cannot be read, and the
    /// [`Key::from_record`] errors for bad content.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let text = fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let record: KeyRecord = serde_yaml::from_str(&text)?;
        Self::from_record(&record)
    }

    /// Write this key to a new YAML key file, readable only by its owner.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Io`] if the file already exists or cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        let yaml = self.to_yaml()?;
        let io_err = |source: std::io::Error| KeyError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o400);
        }
        let mut file = options.open(path).map_err(io_err)?;
        file.write_all(yaml.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)
    }
}

impl SymmetricKey for Key {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        cipher::encrypt(
            self.algorithm,
            &self.key.0,
            self.iv.as_ref().map(|iv| iv.0.as_slice()),
            plaintext,
        )
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        cipher::decrypt(
            self.algorithm,
            &self.key.0,
            self.iv.as_ref().map(|iv| iv.0.as_slice()),
            ciphertext,
        )
    }
}
