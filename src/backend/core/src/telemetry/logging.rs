//! Subscriber setup for the server and CLI.
//!
//! `RUST_LOG`, when set, replaces the configured level and module directives
//! wholesale. Security events are ordinary `tracing` events under the
//! `security` target, so they can be routed with a directive such as
//! `security=warn`.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level directive (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Extra `target=level` directives, e.g. `security = "warn"`.
    #[serde(default)]
    pub module_levels: BTreeMap<String, String>,

    #[serde(default)]
    pub include_location: bool,

    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Emit an event when each span closes, with its busy and idle time.
    #[serde(default)]
    pub span_timings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            module_levels: BTreeMap::new(),
            include_location: false,
            include_target: default_include_target(),
            span_timings: false,
        }
    }
}

fn default_level() -> String { "info".to_string() }
fn default_include_target() -> bool { true }

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Filter from `RUST_LOG`, falling back to the configured directives.
pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    configured_filter(config)
}

fn configured_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)?;
    for (target, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    Ok(filter)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_filter(config)?;
    let spans = if config.span_timings { FmtSpan::CLOSE } else { FmtSpan::NONE };

    // Each formatter is its own type, so the registry is assembled per arm.
    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_events(spans)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(spans)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_span_events(spans)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    tracing::debug!(format = ?config.format, "Logging initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_filter_accepts_module_levels() {
        let mut config = LoggingConfig::default();
        config
            .module_levels
            .insert("security".to_string(), "warn".to_string());
        let filter = configured_filter(&config).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("security=warn"));
        assert!(rendered.contains("info"));
    }

    #[test]
    fn test_configured_filter_rejects_garbage() {
        let mut config = LoggingConfig::default();
        config
            .module_levels
            .insert("bastion".to_string(), "loud[".to_string());
        assert!(configured_filter(&config).is_err());
    }

    #[test]
    fn test_log_format_deserializes_lowercase() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert!(serde_json::from_str::<LogFormat>("\"Pretty\"").is_err());
    }
}
