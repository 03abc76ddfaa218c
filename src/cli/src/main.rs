//! Bastion CLI - offline access to the detector, sanitiser, validator and
//! token primitives.
//!
//! Exit status is 0 when the input is clean, 2 when findings or validation
//! errors were reported, and 1 on any other failure.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{crypt, sanitize, scan, token, validate, Verdict};
use output::OutputFormat;

/// Bastion - request hardening toolkit
#[derive(Parser)]
#[command(
    name = "bastion",
    version,
    about = "Bastion - request hardening toolkit",
    long_about = "Scan, sanitise and validate input offline with the same rules the Bastion pipeline enforces.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report attack signatures found in text
    Scan(scan::ScanArgs),

    /// Filter text and report what the original contained
    Sanitize(sanitize::SanitizeArgs),

    /// Validate a JSON document against a built-in schema
    Validate(validate::ValidateArgs),

    /// Generate a CSRF token
    Token(token::TokenArgs),

    /// Encrypt text with a passphrase-derived key
    Encrypt(crypt::CryptArgs),

    /// Decrypt text produced by `encrypt`
    Decrypt(crypt::CryptArgs),
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(Verdict::Clean) => {}
        Ok(Verdict::Flagged) => std::process::exit(2),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<Verdict> {
    let format = cli.output;
    match cli.command {
        Commands::Scan(args) => scan::execute(args, format),
        Commands::Sanitize(args) => sanitize::execute(args, format),
        Commands::Validate(args) => validate::execute(args, format),
        Commands::Token(args) => token::execute(args, format),
        Commands::Encrypt(args) => crypt::encrypt(args, format),
        Commands::Decrypt(args) => crypt::decrypt(args, format),
    }
}
