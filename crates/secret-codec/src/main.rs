//! `secret-codec` — command-line entry point.
//!
//! Startup sequence:
//! 1. Parse arguments and load [`Settings`] from environment variables.
//! 2. Initialise structured JSON logging on stderr.
//! 3. Build the [`KeyStore`] for the configured key root.
//! 4. Run the requested subcommand, writing its result to stdout.

use std::borrow::Cow;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use secret_codec::keys::install_key;
use secret_codec::{
    envelope, generate_symmetric, telemetry, Algorithm, Key, KeyStore, SecretCodec, Settings,
    SymmetricKey,
};

#[derive(Debug, Parser)]
#[command(name = "secret-codec", version, about = "Encrypt, decrypt and mask v2:{...} secrets")]
struct Cli {
    /// Key root directory (overrides KEY_ROOT).
    #[arg(long, global = true)]
    key_root: Option<PathBuf>,

    /// Key file name relative to the key root (overrides KEY_FILE).
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a new random key.
    GenerateKey {
        /// Write the key here instead of printing it.
        #[arg(long, conflicts_with = "install")]
        output: Option<PathBuf>,
        /// Write the key to the configured key root.
        #[arg(long)]
        install: bool,
        /// Cipher algorithm.
        #[arg(long, default_value = "aes-256-cbc")]
        algorithm: Algorithm,
    },
    /// Encrypt a value (`-` reads stdin).
    Encrypt { value: String },
    /// Decrypt an envelope (`-` reads stdin).
    Decrypt { value: String },
    /// Encrypt unless already encrypted.
    TryEncrypt { value: String },
    /// Decrypt if encrypted, otherwise print as-is.
    TryDecrypt { value: String },
    /// Re-encrypt an envelope under the current key.
    Recrypt {
        value: String,
        /// Key file holding the key the value was encrypted with.
        #[arg(long)]
        prior_key: Option<PathBuf>,
    },
    /// Exit 0 if the value is an envelope, 1 otherwise.
    IsEncrypted { value: String },
    /// Copy stdin to stdout with every envelope masked.
    Sanitize,
    /// MD5-crypt digest of a possibly encrypted password.
    Md5crypt {
        value: String,
        #[arg(long)]
        salt: Option<String>,
    },
    /// Windows unattended-setup encoding of a possibly encrypted password.
    SysprepCrypt { value: String },
}

fn main() -> Result<ExitCode> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    let settings = Settings::from_env_with(cli.key_root, cli.key_file).map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&settings.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Key store
    // -----------------------------------------------------------------------
    let codec = SecretCodec::new(settings.key_store());

    // -----------------------------------------------------------------------
    // 4. Command
    // -----------------------------------------------------------------------
    run(cli.command, &settings, &codec)
}

fn run(command: Command, settings: &Settings, codec: &SecretCodec<KeyStore>) -> Result<ExitCode> {
    let output = match command {
        Command::GenerateKey {
            output,
            install,
            algorithm,
        } => {
            if install {
                let key = generate_symmetric(algorithm, None)?;
                let path = install_key(&settings.key_root, &settings.key_file, &key)?;
                info!(path = %path.display(), "key installed");
                return Ok(ExitCode::SUCCESS);
            }
            let key = generate_symmetric(algorithm, output.as_deref())?;
            if output.is_none() {
                let yaml = key.to_yaml()?;
                io::stdout()
                    .lock()
                    .write_all(yaml.as_bytes())
                    .context("failed to write output")?;
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Encrypt { value } => codec.encrypt(&read_value(value)?)?,
        Command::Decrypt { value } => codec.decrypt(&read_value(value)?)?,
        Command::TryEncrypt { value } => codec.try_encrypt(&read_value(value)?)?,
        Command::TryDecrypt { value } => codec.try_decrypt(&read_value(value)?)?,
        Command::Recrypt { value, prior_key } => {
            let prior = prior_key
                .map(|path| {
                    Key::load(&path)
                        .with_context(|| format!("failed to load prior key {}", path.display()))
                })
                .transpose()?;
            let prior = prior.as_ref().map(|k| k as &dyn SymmetricKey);
            codec.recrypt(&read_value(value)?, prior)?
        }
        Command::IsEncrypted { value } => {
            let encrypted = codec.is_encrypted(&read_value(value)?);
            return Ok(if encrypted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Command::Sanitize => {
            sanitize_stream(io::stdin().lock(), io::stdout().lock())?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Md5crypt { value, salt } => codec.md5crypt(&read_value(value)?, salt.as_deref())?,
        Command::SysprepCrypt { value } => codec.sysprep_crypt(&read_value(value)?)?,
    };

    write_value(io::stdout().lock(), &output)?;
    Ok(ExitCode::SUCCESS)
}

/// Print `value` exactly, followed by one newline.
fn write_value(mut output: impl Write, value: &str) -> Result<()> {
    writeln!(output, "{value}").context("failed to write output")
}

/// `-` means "read the value from stdin", minus one trailing newline.
fn read_value(value: String) -> Result<String> {
    if value != "-" {
        return Ok(value);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read value from stdin")?;
    if buf.ends_with('\n') {
        buf.pop();
        if buf.ends_with('\r') {
            buf.pop();
        }
    }
    Ok(buf)
}

/// Copy `input` to `output` line by line with every envelope masked.
///
/// Line endings are kept as they are. Lines without an envelope are copied
/// byte for byte, even when they are not valid UTF-8.
fn sanitize_stream(mut input: impl BufRead, mut output: impl Write) -> Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = input
            .read_until(b'\n', &mut line)
            .context("failed to read input")?;
        if n == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let masked = match envelope::sanitize(&text) {
            Cow::Borrowed(_) => None,
            Cow::Owned(masked) => Some(masked),
        };
        output
            .write_all(masked.as_ref().map_or(&line[..], |m| m.as_bytes()))
            .context("failed to write output")?;
    }
    output.flush().context("failed to write output")
}
