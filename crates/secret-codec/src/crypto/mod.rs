//! AES-CBC primitives and the symmetric key model.
//!
//! This module is intentionally free of envelope and configuration concerns.
//! It provides the byte-level encrypt/decrypt operations used by the codec.
//!
//! # Key file format
//!
//! ```text
//! ---
//! algorithm: aes-256-cbc
//! key: <base64(key)>
//! iv: <base64(iv)>        # optional
//! ```

pub mod cipher;
pub mod key;

pub use cipher::{Algorithm, CipherError};
pub use key::{Key, KeyError, KeyRecord, SymmetricKey};
