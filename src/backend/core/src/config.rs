//! Configuration management.
//!
//! Values come from an optional file (`config/bastion.{toml,yaml,json}` or an
//! explicit path) overlaid with `BASTION__SECTION__KEY` environment
//! variables, e.g. `BASTION__CSRF__SECRET` or `BASTION__SERVER__PORT`.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::http::{DEFAULT_MAX_BODY_BYTES, DEFAULT_TRUSTED_PROXY_HEADERS};
use crate::pipeline::PipelineConfig;
use crate::security::csrf::MIN_SECRET_LEN;
use crate::security::{CsrfConfig, RateLimitConfig};
use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "BASTION";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONFIG_FILE: &str = "config/bastion";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub csrf: CsrfConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request bodies larger than this are rejected before parsing.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Headers trusted to carry the client address. Leave empty when the
    /// server is not behind a proxy, otherwise clients can pick their own
    /// rate-limit key.
    #[serde(default = "default_trusted_proxy_headers")]
    pub trusted_proxy_headers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            trusted_proxy_headers: default_trusted_proxy_headers(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_body_bytes() -> usize { DEFAULT_MAX_BODY_BYTES }
fn default_trusted_proxy_headers() -> Vec<String> {
    DEFAULT_TRUSTED_PROXY_HEADERS.iter().map(|h| h.to_string()).collect()
}

impl Config {
    /// Load from `config/bastion.*` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load from an explicit file, still overlaid with the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.csrf.secret.is_empty() {
            return Err(ConfigError::invalid(
                "csrf.secret",
                "is required (set BASTION__CSRF__SECRET)",
            ));
        }
        if self.csrf.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid(
                "csrf.secret",
                format!("must be at least {} bytes", MIN_SECRET_LEN),
            ));
        }
        if self.csrf.token_ttl.is_zero() {
            return Err(ConfigError::invalid("csrf.token_ttl", "must be positive"));
        }
        if self.rate_limit.sweep_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::invalid("rate_limit.sweep_interval", "must be positive"));
        }
        for (class, policy) in &self.rate_limit.classes {
            if policy.limit == 0 {
                return Err(ConfigError::invalid(
                    format!("rate_limit.classes.{}.limit", class),
                    "must be positive",
                ));
            }
            if policy.window.is_zero() {
                return Err(ConfigError::invalid(
                    format!("rate_limit.classes.{}.window", class),
                    "must be positive",
                ));
            }
        }
        if self.pipeline.max_string_length == 0 {
            return Err(ConfigError::invalid("pipeline.max_string_length", "must be positive"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid("server.max_body_bytes", "must be positive"));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
