//! Sanitize command.

use anyhow::Result;
use bastion_core::security::Sanitizer;
use clap::Args;

use super::{InputArgs, Verdict};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct SanitizeArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Print only the filtered text
    #[arg(short, long)]
    quiet: bool,
}

pub fn execute(args: SanitizeArgs, format: OutputFormat) -> Result<Verdict> {
    let text = args.input.read()?;
    let outcome = Sanitizer::new().sanitize_outcome(&text);
    let verdict = Verdict::flagged_if(!outcome.is_secure);

    if args.quiet {
        println!("{}", outcome.sanitized);
        return Ok(verdict);
    }

    match format {
        OutputFormat::Table => {
            output::print_header("Sanitisation");
            output::print_detail("Sanitized", &outcome.sanitized);
            output::print_detail(
                "Length",
                &format!("{} -> {}", outcome.original_length, outcome.sanitized_length),
            );
            if outcome.is_secure {
                output::print_success("No attack signatures in the original input");
            } else {
                output::print_detail("Issues", &outcome.issues.join(", "));
                output::print_warning("Original input matched attack signatures");
            }
        }
        _ => output::print_item(&outcome, format)?,
    }
    Ok(verdict)
}
