//! Validate command.
//!
//! Checks a JSON document against one of the built-in form schemas and prints
//! either every field error or the cleaned document.

use anyhow::{anyhow, Context, Result};
use bastion_core::validation::{schemas, ValidationErrors};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use super::{InputArgs, Verdict};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ValidateArgs {
    /// Built-in schema: signup, login, contact or file_request
    #[arg(short, long)]
    schema: String,

    #[command(flatten)]
    input: InputArgs,
}

#[derive(Tabled, Serialize)]
struct ErrorRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn rows(errors: &ValidationErrors) -> Vec<ErrorRow> {
    errors
        .iter()
        .map(|(field, error)| ErrorRow {
            field: field.to_string(),
            code: error.code().to_string(),
            message: error.message.clone(),
        })
        .collect()
}

pub fn execute(args: ValidateArgs, format: OutputFormat) -> Result<Verdict> {
    let schema = schemas::by_name(&args.schema).ok_or_else(|| {
        anyhow!(
            "unknown schema '{}' (expected one of: {})",
            args.schema,
            schemas::SCHEMA_NAMES.join(", ")
        )
    })?;
    let text = args.input.read()?;
    let document: serde_json::Value = serde_json::from_str(&text).context("input is not valid JSON")?;

    match schema.validate(&document) {
        Ok(cleaned) => {
            if matches!(format, OutputFormat::Table) {
                output::print_success(&format!("Valid {}", args.schema));
            }
            output::print_item(&cleaned, format)?;
            Ok(Verdict::Clean)
        }
        Err(errors) => {
            output::print_list(&rows(&errors), format, "")?;
            if matches!(format, OutputFormat::Table) {
                output::print_warning(&format!(
                    "{} error(s) across {} field(s)",
                    errors.len(),
                    errors.field_count()
                ));
            }
            Ok(Verdict::Flagged)
        }
    }
}
