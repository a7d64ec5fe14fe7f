//! Common error types shared across crates.

use thiserror::Error;

/// Top-level codec error type.
///
/// The two decrypt-path variants are deliberately distinct:
/// - [`CodecError::NotEncrypted`] → the caller handed plaintext where an
///   envelope was expected (a bug upstream).
/// - [`CodecError::DecryptionFailed`] → the value was an envelope but the
///   resolved key could not open it (rotated key, corrupted payload).
///
/// Neither is retryable.
#[derive(Debug, Error)]
pub enum CodecError {
    /// `decrypt` was called on a value that is not in `v2:{...}` form.
    #[error("cannot decrypt plaintext string")]
    NotEncrypted,

    /// The envelope could not be decrypted. The underlying cipher failure is
    /// intentionally not carried.
    #[error("cannot decrypt encrypted string")]
    DecryptionFailed,

    /// No key could be resolved (missing, unreadable or malformed key file).
    #[error("encryption key unavailable: {0}")]
    KeyUnavailable(String),

    /// The resolved key refused to encrypt.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),
}

impl CodecError {
    /// Returns `true` when the error points at a caller mistake rather than an
    /// operational failure.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, CodecError::NotEncrypted)
    }
}
