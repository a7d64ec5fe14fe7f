//! [`SecretCodec`]: encrypt, decrypt, rotate and mask `v2:{...}` secrets.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{envelope, CodecError};
use tracing::debug;

use crate::crypto::SymmetricKey;
use crate::keys::{KeyProvider, KeyStore};
use crate::platform;

/// Reversible protection of configuration secrets.
///
/// The key provider is injected at construction, so callers decide where keys
/// come from (a [`KeyStore`] in production, a fixed key in tests).
#[derive(Debug, Clone)]
pub struct SecretCodec<P = KeyStore> {
    keys: P,
}

impl<P: KeyProvider> SecretCodec<P> {
    /// Create a codec resolving keys through `keys`.
    pub fn new(keys: P) -> Self {
        Self { keys }
    }

    /// The injected key provider.
    pub fn keys(&self) -> &P {
        &self.keys
    }

    fn current_key(&self) -> Result<Arc<dyn SymmetricKey>, CodecError> {
        self.keys.current_key()
    }

    // -----------------------------------------------------------------------
    // Encrypt
    // -----------------------------------------------------------------------

    /// Encrypt `plaintext` under the current key. `""` becomes `v2:{}`
    /// without resolving a key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::KeyUnavailable`] if no key can be resolved, or
    /// [`CodecError::EncryptionFailure`] if the key refuses to encrypt.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        if plaintext.is_empty() {
            return Ok(envelope::wrap(""));
        }
        let key = self.current_key()?;
        self.encrypt_with(plaintext, key.as_ref())
    }

    /// Encrypt `plaintext` under an explicit key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::EncryptionFailure`] if the key refuses to encrypt.
    pub fn encrypt_with(&self, plaintext: &str, key: &dyn SymmetricKey) -> Result<String, CodecError> {
        if plaintext.is_empty() {
            return Ok(envelope::wrap(""));
        }
        let ciphertext = key
            .encrypt(plaintext.as_bytes())
            .map_err(|e| CodecError::EncryptionFailure(e.to_string()))?;
        Ok(envelope::wrap(&STANDARD.encode(ciphertext)))
    }

    /// [`SecretCodec::encrypt`] with absent values passed through.
    ///
    /// # Errors
    ///
    /// As [`SecretCodec::encrypt`].
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, CodecError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Encrypt only if `value` is not already an envelope.
    ///
    /// # Errors
    ///
    /// As [`SecretCodec::encrypt`]; never for values already encrypted.
    pub fn try_encrypt(&self, value: &str) -> Result<String, CodecError> {
        if self.is_encrypted(value) {
            return Ok(value.to_owned());
        }
        self.encrypt(value)
    }

    // -----------------------------------------------------------------------
    // Decrypt
    // -----------------------------------------------------------------------

    /// Decrypt an envelope (or legacy templated envelope) under the current key.
    ///
    /// `""` and `v2:{}` both yield `""` without resolving a key.
    ///
    /// # Errors
    ///
    /// - [`CodecError::NotEncrypted`] if `value` is not an envelope.
    /// - [`CodecError::DecryptionFailed`] if the payload does not decrypt.
    /// - [`CodecError::KeyUnavailable`] if a key is needed but none resolves.
    pub fn decrypt(&self, value: &str) -> Result<String, CodecError> {
        match payload_of(value)? {
            None => Ok(String::new()),
            Some(payload) => {
                let key = self.current_key()?;
                open(payload, key.as_ref())
            }
        }
    }

    /// Decrypt under an explicit key.
    ///
    /// # Errors
    ///
    /// [`CodecError::NotEncrypted`] or [`CodecError::DecryptionFailed`].
    pub fn decrypt_with(&self, value: &str, key: &dyn SymmetricKey) -> Result<String, CodecError> {
        match payload_of(value)? {
            None => Ok(String::new()),
            Some(payload) => open(payload, key),
        }
    }

    /// [`SecretCodec::decrypt`] with absent values passed through.
    ///
    /// # Errors
    ///
    /// As [`SecretCodec::decrypt`].
    pub fn decrypt_opt(&self, value: Option<&str>) -> Result<Option<String>, CodecError> {
        value.map(|v| self.decrypt(v)).transpose()
    }

    /// Decrypt only if `value` is an envelope; plaintext is returned as-is.
    ///
    /// # Errors
    ///
    /// [`CodecError::DecryptionFailed`] or [`CodecError::KeyUnavailable`] for
    /// envelopes that cannot be opened. Never [`CodecError::NotEncrypted`].
    pub fn try_decrypt(&self, value: &str) -> Result<String, CodecError> {
        if self.is_encrypted(value) {
            return self.decrypt(value);
        }
        Ok(value.to_owned())
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    /// Re-encrypt `value` under the current key.
    ///
    /// `prior` is tried first; if it is absent or fails for any reason the
    /// current key is used to decrypt instead.
    ///
    /// # Errors
    ///
    /// Errors only from the current-key decrypt and the final encrypt.
    pub fn recrypt(&self, value: &str, prior: Option<&dyn SymmetricKey>) -> Result<String, CodecError> {
        let plaintext = match prior.and_then(|key| self.decrypt_with(value, key).ok()) {
            Some(plaintext) => plaintext,
            None => self.decrypt(value)?,
        };
        self.encrypt(&plaintext)
    }

    /// [`SecretCodec::recrypt`] with absent values passed through.
    ///
    /// # Errors
    ///
    /// As [`SecretCodec::recrypt`].
    pub fn recrypt_opt(
        &self,
        value: Option<&str>,
        prior: Option<&dyn SymmetricKey>,
    ) -> Result<Option<String>, CodecError> {
        value.map(|v| self.recrypt(v, prior)).transpose()
    }

    // -----------------------------------------------------------------------
    // Inspection and masking
    // -----------------------------------------------------------------------

    /// Returns `true` if `value` is an envelope, directly or in legacy form.
    pub fn is_encrypted(&self, value: &str) -> bool {
        envelope::is_encrypted(value)
    }

    /// Mask every envelope in `text`. Never decrypts.
    pub fn sanitize(&self, text: &str) -> String {
        envelope::sanitize(text).into_owned()
    }

    /// Mask every envelope in `text` in place.
    pub fn sanitize_in_place(&self, text: &mut String) {
        envelope::sanitize_in_place(text);
    }

    // -----------------------------------------------------------------------
    // Platform credentials
    // -----------------------------------------------------------------------

    /// MD5-crypt digest of a possibly encrypted password.
    ///
    /// # Errors
    ///
    /// As [`SecretCodec::try_decrypt`].
    pub fn md5crypt(&self, value: &str, salt: Option<&str>) -> Result<String, CodecError> {
        let password = self.try_decrypt(value)?;
        Ok(platform::md5_crypt(
            &password,
            salt.unwrap_or(platform::DEFAULT_MD5_SALT),
        ))
    }

    /// Windows unattended-setup encoding of a possibly encrypted password.
    ///
    /// # Errors
    ///
    /// As [`SecretCodec::try_decrypt`].
    pub fn sysprep_crypt(&self, value: &str) -> Result<String, CodecError> {
        let password = self.try_decrypt(value)?;
        Ok(platform::sysprep_password(&password))
    }
}

/// `Ok(None)` for inputs that decrypt to `""` without a key, `Ok(Some(payload))`
/// for envelopes with content.
fn payload_of(value: &str) -> Result<Option<&str>, CodecError> {
    if value.is_empty() {
        return Ok(None);
    }
    match envelope::payload(value) {
        None => Err(CodecError::NotEncrypted),
        Some("") => Ok(None),
        Some(payload) => Ok(Some(payload)),
    }
}

/// Decode and decrypt a payload. Every failure collapses to
/// [`CodecError::DecryptionFailed`].
fn open(payload: &str, key: &dyn SymmetricKey) -> Result<String, CodecError> {
    let ciphertext = STANDARD.decode(payload).map_err(|_| {
        debug!(reason = "base64", "envelope decrypt failed");
        CodecError::DecryptionFailed
    })?;
    let plaintext = key.decrypt(&ciphertext).map_err(|_| {
        debug!(reason = "cipher", "envelope decrypt failed");
        CodecError::DecryptionFailed
    })?;
    String::from_utf8(plaintext).map_err(|_| {
        debug!(reason = "utf8", "envelope decrypt failed");
        CodecError::DecryptionFailed
    })
}
