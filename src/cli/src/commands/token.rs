//! Token command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bastion_core::crypto;
use bastion_core::security::{CsrfConfig, CsrfManager, SecurityEventLogger};
use clap::Args;
use serde::Serialize;

use super::Verdict;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct TokenArgs {
    /// Signing secret. When given, the signed cookie value is printed too.
    #[arg(long, env = "BASTION__CSRF__SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Token lifetime, e.g. "30m" or "1h"
    #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
    ttl: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssuedToken {
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cookie: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
}

pub fn execute(args: TokenArgs, format: OutputFormat) -> Result<Verdict> {
    let issued = match args.secret {
        None => IssuedToken {
            token: crypto::random_token(),
            cookie: None,
            expires_at: None,
        },
        Some(secret) => {
            let csrf = CsrfManager::new(CsrfConfig::with_secret(secret), Arc::new(SecurityEventLogger::default()))
                .map_err(|e| anyhow!("{}", e))?;
            let token = csrf.issue(args.ttl);
            IssuedToken {
                cookie: Some(csrf.seal(&token)),
                expires_at: Some(token.expires_at.to_rfc3339()),
                token: token.value,
            }
        }
    };

    match format {
        OutputFormat::Table => {
            println!("{}", issued.token);
            if let (Some(cookie), Some(expires_at)) = (&issued.cookie, &issued.expires_at) {
                output::print_detail("Cookie", cookie);
                output::print_detail("Expires", expires_at);
            }
        }
        _ => output::print_item(&issued, format)?,
    }
    Ok(Verdict::Clean)
}
