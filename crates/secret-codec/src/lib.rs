//! `secret-codec` — reversible protection of configuration secrets.
//!
//! Secrets are stored as `v2:{<base64(ciphertext)>}` envelopes produced with a
//! symmetric key read from a key file below a configurable key root.
//!
//! ```no_run
//! use secret_codec::{KeyStore, SecretCodec};
//!
//! let codec = SecretCodec::new(KeyStore::at_root("/etc/app/certs"));
//! let stored = codec.encrypt("hunter2")?;
//! assert_eq!(codec.decrypt(&stored)?, "hunter2");
//! println!("{}", codec.sanitize(&format!("password={stored}")));
//! # Ok::<(), secret_codec::CodecError>(())
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod platform;
pub mod telemetry;

pub use codec::SecretCodec;
pub use common::{envelope, CodecError};
pub use config::Settings;
pub use crypto::{Algorithm, Key, KeyError, SymmetricKey};
pub use keys::{generate_symmetric, KeyProvider, KeyStore};
