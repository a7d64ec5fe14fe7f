//! Configuration loading and validation for the codec.
//!
//! All values are read from environment variables once at startup. The binary
//! exits with a clear error message if any value is invalid.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::keys::{KeyStore, DEFAULT_KEY_FILE};

/// Validated codec configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory holding the key file (`KEY_ROOT`).
    #[serde(default = "default_key_root")]
    pub key_root: PathBuf,

    /// Key file name, relative to the key root (`KEY_FILE`).
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_key_root() -> PathBuf {
    PathBuf::from("certs")
}
fn default_key_file() -> PathBuf {
    PathBuf::from(DEFAULT_KEY_FILE)
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            key_root: default_key_root(),
            key_file: default_key_file(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(None, None)
    }

    /// Load configuration from environment variables, replace the key location
    /// with any explicit override, then validate the result.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or the final values
    /// fail validation.
    pub fn from_env_with(key_root: Option<PathBuf>, key_file: Option<PathBuf>) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(false))
            .build()
            .context("failed to build configuration from environment")?;

        let mut s: Settings = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        s.apply_overrides(key_root, key_file);
        s.validate()?;
        Ok(s)
    }

    /// Replace the key root and key file where an override is given.
    pub fn apply_overrides(&mut self, key_root: Option<PathBuf>, key_file: Option<PathBuf>) {
        if let Some(root) = key_root {
            self.key_root = root;
        }
        if let Some(file) = key_file {
            self.key_file = file;
        }
    }

    /// Full path of the key file.
    pub fn key_path(&self) -> PathBuf {
        self.key_root.join(&self.key_file)
    }

    /// Build the key store described by these settings.
    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(&self.key_root, &self.key_file)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.key_root, "KEY_ROOT")?;
        ensure_non_empty(&self.key_file, "KEY_FILE")?;
        if self.key_file.is_absolute() {
            anyhow::bail!("KEY_FILE must be relative to KEY_ROOT");
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("LOG_LEVEL must not be empty");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &Path, name: &str) -> Result<()> {
    if value.as_os_str().to_string_lossy().trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
