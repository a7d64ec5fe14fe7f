//! Key resolution and key bootstrapping.
//!
//! # Lifecycle
//!
//! 1. A [`KeyStore`] is built once at startup from the configured key root and
//!    handed to the codec; there is no process-global key.
//! 2. The key file is read on first use and the parsed key is shared, read-only,
//!    for the life of the store.
//! 3. [`KeyStore::set_key_root`] drops the cached key; the next access reloads.
//! 4. New installations bootstrap a key with [`generate_symmetric`].
//!
//! # Security invariants
//!
//! - Key material is never logged and is redacted from `Debug` output.
//! - Key files are created owner read-only and never overwritten.

pub mod store;

pub use store::{install_key, KeyStore};

use std::path::Path;
use std::sync::Arc;

use common::CodecError;
use tracing::info;

use crate::crypto::{Algorithm, Key, KeyError, SymmetricKey};

/// File name of the key below the key root.
pub const DEFAULT_KEY_FILE: &str = "v2_key";

/// Something that can hand out the key the codec should use right now.
#[cfg_attr(test, mockall::automock)]
pub trait KeyProvider: Send + Sync {
    /// Resolve the current key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::KeyUnavailable`] if no key can be resolved.
    fn current_key(&self) -> Result<Arc<dyn SymmetricKey>, CodecError>;
}

impl<T> KeyProvider for Arc<T>
where
    T: KeyProvider + ?Sized,
{
    fn current_key(&self) -> Result<Arc<dyn SymmetricKey>, CodecError> {
        (**self).current_key()
    }
}

impl<T> KeyProvider for Box<T>
where
    T: KeyProvider + ?Sized,
{
    fn current_key(&self) -> Result<Arc<dyn SymmetricKey>, CodecError> {
        (**self).current_key()
    }
}

/// Generate a fresh random key and, if `output` is given, persist it there
/// with owner read-only permissions.
///
/// # Errors
///
/// Returns [`KeyError::Io`] if `output` exists or cannot be written.
pub fn generate_symmetric(algorithm: Algorithm, output: Option<&Path>) -> Result<Key, KeyError> {
    let key = Key::generate(algorithm, None, None);
    if let Some(path) = output {
        key.save(path)?;
        info!(path = %path.display(), algorithm = %algorithm, "generated new encryption key");
    }
    Ok(key)
}
