//! Encrypt and decrypt commands.
//!
//! The key is derived from the passphrase and salt, so the same pair must be
//! given to decrypt.

use anyhow::{Context, Result};
use bastion_core::crypto::Cipher;
use clap::Args;
use serde_json::{Map, Value};

use super::{InputArgs, Verdict};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct CryptArgs {
    /// Passphrase the key is derived from
    #[arg(long, env = "BASTION_PASSPHRASE", hide_env_values = true)]
    passphrase: String,

    /// Salt for key derivation
    #[arg(long)]
    salt: String,

    #[command(flatten)]
    input: InputArgs,
}

impl CryptArgs {
    fn cipher(&self) -> Cipher {
        Cipher::derive(&self.passphrase, self.salt.as_bytes())
    }
}

pub fn encrypt(args: CryptArgs, format: OutputFormat) -> Result<Verdict> {
    let plaintext = args.input.read()?;
    let encoded = args
        .cipher()
        .encrypt(plaintext.as_bytes())
        .context("encryption failed")?;
    emit("ciphertext", &encoded, format)
}

pub fn decrypt(args: CryptArgs, format: OutputFormat) -> Result<Verdict> {
    let encoded = args.input.read()?;
    let plaintext = args
        .cipher()
        .decrypt_string(encoded.trim())
        .context("decryption failed (wrong passphrase or salt, or tampered input)")?;
    emit("plaintext", &plaintext, format)
}

fn emit(key: &str, value: &str, format: OutputFormat) -> Result<Verdict> {
    match format {
        OutputFormat::Table => println!("{}", value),
        _ => {
            let mut document = Map::new();
            document.insert(key.to_string(), Value::String(value.to_string()));
            output::print_item(&document, format)?
        }
    }
    Ok(Verdict::Clean)
}
