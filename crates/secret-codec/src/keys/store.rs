//! [`KeyStore`]: file-backed, lazily loaded key cache.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::{ArcSwap, ArcSwapOption};
use common::CodecError;
use tracing::{info, warn};

use crate::crypto::{Key, KeyError, SymmetricKey};

use super::{KeyProvider, DEFAULT_KEY_FILE};

struct Inner {
    /// Explicitly supplied key; bypasses the key root entirely.
    explicit: Option<Arc<dyn SymmetricKey>>,
    root: ArcSwap<PathBuf>,
    key_file: PathBuf,
    /// Only successfully loaded keys are cached.
    cached: ArcSwapOption<Key>,
    /// Set once the missing-file warning was logged for the current root.
    warned_missing: AtomicBool,
    /// Serialises file loads and root changes so each root is read once.
    load_lock: Mutex<()>,
}

/// Thread-safe provider of the current symmetric key.
///
/// Resolution order:
/// 1. an explicit key given to [`KeyStore::with_key`];
/// 2. `<key_root>/<key_file>`, read once and cached;
/// 3. nothing: every call returns [`CodecError::KeyUnavailable`] and the file
///    is checked again on the next call. The warning is logged once per root.
///
/// Readers take the cached key lock-free; only calls made while no key is
/// cached touch the filesystem.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<Inner>,
}

impl KeyStore {
    /// Create a store reading `key_file` relative to `key_root`.
    pub fn new(key_root: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self::build(None, key_root.into(), key_file.into())
    }

    /// Create a store reading the default key file name from `key_root`.
    pub fn at_root(key_root: impl Into<PathBuf>) -> Self {
        Self::new(key_root, DEFAULT_KEY_FILE)
    }

    /// Create a store that always hands out `key`.
    pub fn with_key(key: Arc<dyn SymmetricKey>) -> Self {
        Self::build(Some(key), PathBuf::new(), PathBuf::from(DEFAULT_KEY_FILE))
    }

    fn build(explicit: Option<Arc<dyn SymmetricKey>>, root: PathBuf, key_file: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                explicit,
                root: ArcSwap::from_pointee(root),
                key_file,
                cached: ArcSwapOption::empty(),
                warned_missing: AtomicBool::new(false),
                load_lock: Mutex::new(()),
            }),
        }
    }

    /// Current key root directory.
    pub fn key_root(&self) -> PathBuf {
        (**self.inner.root.load()).clone()
    }

    /// Full path of the key file under the current root.
    pub fn key_path(&self) -> PathBuf {
        self.inner.root.load().join(&self.inner.key_file)
    }

    /// Point the store at a new key root and drop any cached key.
    ///
    /// The next [`KeyProvider::current_key`] call reloads from the new root.
    pub fn set_key_root(&self, root: impl Into<PathBuf>) {
        let _guard = self
            .inner
            .load_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.root.store(Arc::new(root.into()));
        self.inner.cached.store(None);
        self.inner.warned_missing.store(false, Ordering::Relaxed);
    }

    /// Returns `true` if a key is available without touching the filesystem.
    pub fn is_loaded(&self) -> bool {
        self.inner.explicit.is_some() || self.inner.cached.load().is_some()
    }

    fn load(&self) -> Result<Arc<dyn SymmetricKey>, CodecError> {
        let _guard = self
            .inner
            .load_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another thread may have finished the load while we waited.
        if let Some(key) = self.inner.cached.load_full() {
            return Ok(key as Arc<dyn SymmetricKey>);
        }

        let path = self.key_path();
        match Key::load(&path) {
            Ok(key) => {
                info!(path = %path.display(), algorithm = %key.algorithm(), "encryption key loaded");
                let key = Arc::new(key);
                self.inner.cached.store(Some(key.clone()));
                self.inner.warned_missing.store(false, Ordering::Relaxed);
                Ok(key as Arc<dyn SymmetricKey>)
            }
            Err(KeyError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                if !self.inner.warned_missing.swap(true, Ordering::Relaxed) {
                    warn!(
                        path = %path.display(),
                        "encryption key file not found; encrypt and decrypt will fail until a key is provided"
                    );
                }
                Err(CodecError::KeyUnavailable(format!(
                    "key file {} not found",
                    path.display()
                )))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load encryption key");
                Err(CodecError::KeyUnavailable(e.to_string()))
            }
        }
    }
}

impl KeyProvider for KeyStore {
    fn current_key(&self) -> Result<Arc<dyn SymmetricKey>, CodecError> {
        if let Some(key) = &self.inner.explicit {
            return Ok(key.clone());
        }
        match self.inner.cached.load_full() {
            Some(key) => Ok(key as Arc<dyn SymmetricKey>),
            None => self.load(),
        }
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("explicit", &self.inner.explicit.is_some())
            .field("key_path", &self.key_path())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Write `key` below `root` under `file`, creating `root` if needed.
///
/// Convenience for tests and bootstrap code that want a ready-to-use root.
///
/// # Errors
///
/// Returns [`KeyError::Io`] if the directory or file cannot be created.
pub fn install_key(root: &Path, file: &Path, key: &Key) -> Result<PathBuf, KeyError> {
    std::fs::create_dir_all(root).map_err(|source| KeyError::Io {
        path: root.display().to_string(),
        source,
    })?;
    let path = root.join(file);
    key.save(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key::MockSymmetricKey;
    use crate::crypto::Algorithm;
    use std::thread;

    fn key_with(password: &[u8]) -> Key {
        Key::generate(Algorithm::Aes256Cbc, Some(password), None)
    }

    fn encrypt_with(store: &KeyStore, plaintext: &[u8]) -> Vec<u8> {
        store.current_key().unwrap().encrypt(plaintext).unwrap()
    }

    #[test]
    fn loads_key_from_root() {
        let dir = tempfile::tempdir().unwrap();
        let key = key_with(b"one");
        install_key(dir.path(), Path::new(DEFAULT_KEY_FILE), &key).unwrap();

        let store = KeyStore::at_root(dir.path());
        assert!(!store.is_loaded());
        assert_eq!(encrypt_with(&store, b"x"), key.encrypt(b"x").unwrap());
        assert!(store.is_loaded());
        assert_eq!(store.key_path(), dir.path().join(DEFAULT_KEY_FILE));
    }

    #[test]
    fn missing_key_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::at_root(dir.path());
        for _ in 0..2 {
            assert!(matches!(
                store.current_key(),
                Err(CodecError::KeyUnavailable(_))
            ));
        }
        assert!(!store.is_loaded());
        assert!(store.inner.warned_missing.load(Ordering::Relaxed));
    }

    #[test]
    fn key_file_created_after_a_miss_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::at_root(dir.path());
        assert!(store.current_key().is_err());

        let key = key_with(b"late");
        install_key(dir.path(), Path::new(DEFAULT_KEY_FILE), &key).unwrap();
        assert_eq!(encrypt_with(&store, b"x"), key.encrypt(b"x").unwrap());
        assert!(store.is_loaded());
        assert!(!store.inner.warned_missing.load(Ordering::Relaxed));
    }

    #[test]
    fn malformed_key_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_KEY_FILE);
        std::fs::write(&path, "algorithm: aes-256-cbc\nkey: AAAA\n").unwrap();

        let store = KeyStore::at_root(dir.path());
        assert!(matches!(
            store.current_key(),
            Err(CodecError::KeyUnavailable(_))
        ));

        std::fs::remove_file(&path).unwrap();
        key_with(b"fixed").save(&path).unwrap();
        assert!(store.current_key().is_ok());
    }

    #[test]
    fn changing_root_invalidates_cache() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let key_a = key_with(b"a");
        let key_b = key_with(b"b");
        install_key(a.path(), Path::new(DEFAULT_KEY_FILE), &key_a).unwrap();
        install_key(b.path(), Path::new(DEFAULT_KEY_FILE), &key_b).unwrap();

        let store = KeyStore::at_root(a.path());
        assert_eq!(encrypt_with(&store, b"x"), key_a.encrypt(b"x").unwrap());

        store.set_key_root(b.path());
        assert!(!store.is_loaded());
        assert_eq!(store.key_root(), b.path());
        assert_eq!(encrypt_with(&store, b"x"), key_b.encrypt(b"x").unwrap());
    }

    #[test]
    fn missing_root_recovers_after_root_change() {
        let empty = tempfile::tempdir().unwrap();
        let full = tempfile::tempdir().unwrap();
        install_key(full.path(), Path::new(DEFAULT_KEY_FILE), &key_with(b"k")).unwrap();

        let store = KeyStore::at_root(empty.path());
        assert!(store.current_key().is_err());
        assert!(store.inner.warned_missing.load(Ordering::Relaxed));
        store.set_key_root(full.path());
        assert!(!store.inner.warned_missing.load(Ordering::Relaxed));
        assert!(store.current_key().is_ok());
    }

    #[test]
    fn concurrent_first_use_shares_one_key() {
        let dir = tempfile::tempdir().unwrap();
        install_key(dir.path(), Path::new(DEFAULT_KEY_FILE), &key_with(b"shared")).unwrap();
        let store = KeyStore::at_root(dir.path());

        let keys: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.current_key().unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        for key in &keys[1..] {
            assert!(Arc::ptr_eq(&keys[0], key));
        }
    }

    #[test]
    fn explicit_key_wins() {
        let mut mock = MockSymmetricKey::new();
        mock.expect_encrypt().returning(|_| Ok(b"fake".to_vec()));
        let store = KeyStore::with_key(Arc::new(mock));

        assert!(store.is_loaded());
        assert_eq!(encrypt_with(&store, b"anything"), b"fake");
    }

    #[test]
    fn install_key_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("certs");
        let path = install_key(&root, Path::new("custom_key"), &key_with(b"n")).unwrap();
        assert_eq!(path, root.join("custom_key"));

        let store = KeyStore::new(&root, "custom_key");
        assert!(store.current_key().is_ok());
    }

    #[test]
    fn debug_shows_no_key_material() {
        let store = KeyStore::at_root("/nonexistent");
        let shown = format!("{store:?}");
        assert!(shown.contains("KeyStore"));
        assert!(shown.contains("loaded: false"));
    }
}
