//! Subcommands.

pub mod crypt;
pub mod sanitize;
pub mod scan;
pub mod token;
pub mod validate;

use anyhow::{bail, Context, Result};
use clap::Args;
use std::io::Read;
use std::path::PathBuf;

/// Whether a command reported anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Flagged,
}

impl Verdict {
    pub fn flagged_if(flagged: bool) -> Self {
        if flagged {
            Self::Flagged
        } else {
            Self::Clean
        }
    }
}

/// Input given inline, from a file, or on stdin.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Text to process. Reads stdin when neither this nor --file is given.
    pub text: Option<String>,

    /// Read the input from a file
    #[arg(short, long, conflicts_with = "text")]
    pub file: Option<PathBuf>,
}

impl InputArgs {
    pub fn read(&self) -> Result<String> {
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()));
        }
        if let Some(text) = &self.text {
            return Ok(text.clone());
        }
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        if buffer.is_empty() {
            bail!("no input given (pass TEXT, --file or pipe to stdin)");
        }
        Ok(buffer)
    }
}
