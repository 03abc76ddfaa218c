//! Scan command.
//!
//! Runs every enabled detector category over the input and lists the matching
//! signatures.

use anyhow::Result;
use bastion_core::security::{Finding, PatternDetector, ThreatCategory};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use super::{InputArgs, Verdict};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ScanArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Only check these categories (repeatable)
    #[arg(short, long, value_parser = parse_category)]
    category: Vec<ThreatCategory>,
}

#[derive(Tabled, Serialize)]
struct FindingRow {
    #[tabled(rename = "Category")]
    category: ThreatCategory,
    #[tabled(rename = "Signature")]
    signature: &'static str,
    #[tabled(rename = "Event")]
    event: &'static str,
}

impl From<Finding> for FindingRow {
    fn from(finding: Finding) -> Self {
        Self {
            category: finding.category,
            signature: finding.signature,
            event: finding.category.event_type().as_str(),
        }
    }
}

pub fn execute(args: ScanArgs, format: OutputFormat) -> Result<Verdict> {
    let text = args.input.read()?;
    let detector = if args.category.is_empty() {
        PatternDetector::new()
    } else {
        PatternDetector::with_categories(args.category)
    };

    let rows: Vec<FindingRow> = detector.scan(&text).into_iter().map(FindingRow::from).collect();
    output::print_list(&rows, format, "No attack signatures found.")?;
    if matches!(format, OutputFormat::Table) && !rows.is_empty() {
        output::print_warning(&format!("{} signature(s) matched", rows.len()));
    }
    Ok(Verdict::flagged_if(!rows.is_empty()))
}

pub(crate) fn parse_category(raw: &str) -> Result<ThreatCategory, String> {
    ThreatCategory::ALL
        .into_iter()
        .find(|c| c.as_str().eq_ignore_ascii_case(raw))
        .ok_or_else(|| {
            let names: Vec<&str> = ThreatCategory::ALL.iter().map(|c| c.as_str()).collect();
            format!("unknown category '{}' (expected one of: {})", raw, names.join(", "))
        })
}
